use std::sync::{Arc, Mutex};
use std::time::Duration;

use signpad::capture::DrawingPad;
use signpad::completion::{CompletionEvent, CompletionSink, COMPLETION_SIGNAL};
use signpad::config::Config;
use signpad::export::PagePolicy;
use signpad::field::FieldType;
use signpad::geometry::Point;
use signpad::mode::{Mode, Transition};
use signpad::session::Session;
use signpad::signing::{Activation, NextField};
use signpad::source::PageImage;

#[derive(Clone, Default)]
struct SharedSink {
    events: Arc<Mutex<Vec<CompletionEvent>>>,
    signals: Arc<Mutex<Vec<String>>>,
}

impl CompletionSink for SharedSink {
    fn post_event(&mut self, event: &CompletionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn post_signal(&mut self, signal: &str) {
        self.signals.lock().unwrap().push(signal.to_string());
    }
}

fn white_page() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(60, 80, image::Rgb([255, 255, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn drawn_signature() -> String {
    let mut pad = DrawingPad::new();
    pad.pointer_down(Point::new(40.0, 150.0));
    pad.pointer_move(Point::new(200.0, 40.0));
    pad.pointer_move(Point::new(480.0, 160.0));
    pad.pointer_up();
    pad.render().unwrap()
}

#[test]
fn author_then_sign_two_page_document() {
    let config = Config {
        export_render_scale: 0.5,
        output_page: PagePolicy::default(),
        ..Default::default()
    };
    let mut session = Session::threaded(config).unwrap();
    let sink = SharedSink::default();
    session.add_sink(Box::new(sink.clone()));

    let pages = vec![
        PageImage {
            encoded: white_page(),
            native: None,
        },
        PageImage {
            encoded: white_page(),
            native: None,
        },
    ];
    session.load_images(pages, "file:///contract.pdf").unwrap();
    session.wait_idle(Duration::from_secs(30));
    assert!(!session.is_loading());
    assert_eq!(session.page_count(), 2);

    // Author the layout at 1.5x zoom.
    session.set_zoom(1.5);
    let sig_p2 = session
        .place_field(2, Point::new(150.0, 600.0), FieldType::Signature)
        .unwrap();
    let sig_p1 = session
        .place_field(1, Point::new(150.0, 150.0), FieldType::Signature)
        .unwrap();
    let ini_p1 = session
        .place_field(1, Point::new(600.0, 150.0), FieldType::Initial)
        .unwrap();
    let date_p2 = session
        .place_field(2, Point::new(150.0, 900.0), FieldType::Date)
        .unwrap();
    assert!(session.store().get(&date_p2).unwrap().is_filled);

    // Layout round trip through JSON drops nothing structural.
    let json = session.layout().to_json().unwrap();
    session.import_layout_json(&json).unwrap();
    assert_eq!(session.store().len(), 4);

    // Consent gates signing.
    assert_eq!(session.request_mode(Mode::Signing), Transition::ConsentRequired);
    assert_eq!(session.mode(), Mode::Editor);
    assert_eq!(session.grant_consent(), Transition::Entered(Mode::Signing));
    assert!(session.store().get(&date_p2).unwrap().is_filled);
    assert_eq!(session.signatures_remaining(), 2);
    assert_eq!(session.initials_remaining(), 1);

    // Page 1 signature first: a blank capture prompt.
    let sig = drawn_signature();
    match session.activate_field(&sig_p1) {
        Activation::Prompt(request) => assert!(!request.is_edit()),
        other => panic!("expected prompt, got {:?}", other),
    }
    let next = session.apply_capture(&sig).unwrap();
    assert_eq!(next, Some(NextField::Field(ini_p1.clone())));

    // Initials have their own slot in the cache, so they prompt too.
    assert!(matches!(session.activate_field(&ini_p1), Activation::Prompt(_)));
    let mut pad = DrawingPad::new();
    pad.pointer_down(Point::new(100.0, 100.0));
    pad.pointer_move(Point::new(300.0, 100.0));
    pad.pointer_up();
    let next = session.apply_capture(&pad.render().unwrap()).unwrap();
    assert_eq!(next, Some(NextField::Field(sig_p2.clone())));

    // The second signature reuses the saved one.
    assert_eq!(
        session.activate_field(&sig_p2),
        Activation::AutoApplied {
            next: NextField::AllComplete
        }
    );
    assert_eq!(
        session.store().get(&sig_p1).unwrap().value,
        session.store().get(&sig_p2).unwrap().value
    );
    assert!(session.can_complete());

    session.complete(None).unwrap();
    // The worker refuses a second completion while the first runs.
    if session.is_processing() {
        assert!(session.complete(None).is_err());
    }
    session.wait_idle(Duration::from_secs(60));
    assert!(!session.is_processing());

    let done = session.last_export().expect("export finished");
    assert_eq!(done.pdf.page_count(), 2);
    let doc = lopdf::Document::load_mem(done.pdf.bytes()).unwrap();
    assert_eq!(doc.get_pages().len(), 2);
    let signed = done.pdf.bytes().to_vec();

    // Download renders the same bytes.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signed.pdf");
    session.download(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), signed);

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, "completed");
    assert_eq!(events[0].document_layout.fields.len(), 4);
    assert_eq!(*sink.signals.lock().unwrap(), vec![COMPLETION_SIGNAL.to_string()]);

    // Back to the editor: the cache goes, values stay.
    drop(events);
    session.request_mode(Mode::Editor);
    assert!(!session.modes().cache().has(FieldType::Signature));
    assert!(session.store().get(&sig_p2).unwrap().is_filled);
}
