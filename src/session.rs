use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::capture;
use crate::completion::{CompletionEvent, CompletionSink, COMPLETION_SIGNAL};
use crate::config::Config;
use crate::drag::FieldDrag;
use crate::error::{Result, SignError};
use crate::export::{self, ExportProgress, SignedPdf};
use crate::field::FieldType;
use crate::geometry::{PageDims, PageView, Point};
use crate::layout::{self, DocumentLayout};
use crate::mode::{Mode, ModeController, Transition};
use crate::signing::{Activation, NextField, SigningFlow};
use crate::source::{DocumentSource, PageImage};
use crate::store::FieldStore;
use crate::upload::{HttpUploader, Uploader};
use crate::worker::{
    CompletedExport, DocumentInfo, InlineRunner, Job, JobKind, JobRunner, JobWorker, UploadPlan,
    WorkerEvent,
};

const ZOOM_MIN: f64 = 0.1;
const ZOOM_MAX: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

struct LoadedDocument {
    source: DocumentSource,
    source_url: String,
    page_sizes: Vec<PageDims>,
}

/// Everything about one open document: its pages, the placed fields, the
/// editor/signing mode and the jobs running on its behalf.
pub struct Session {
    config: Config,
    runner: Box<dyn JobRunner>,
    document: Option<LoadedDocument>,
    /// Source waiting for its decode job to finish.
    pending: Option<(DocumentSource, String)>,
    loading: bool,
    processing: bool,
    progress: Option<ExportProgress>,
    store: FieldStore,
    modes: ModeController,
    signing: SigningFlow,
    drag: Option<FieldDrag>,
    zoom: f64,
    notices: Vec<Notice>,
    sinks: Vec<Box<dyn CompletionSink>>,
    last_export: Option<CompletedExport>,
    /// Where the running download job writes its result.
    pending_download: Option<PathBuf>,
}

/// Build the HTTP uploader described by `config`, if an endpoint is set.
pub fn uploader_from_config(config: &Config) -> Option<Box<dyn Uploader>> {
    let endpoint = config.upload_endpoint.as_deref()?;
    Some(Box::new(HttpUploader::new(
        endpoint,
        config.metadata_callback.as_deref(),
        config.upload_timeout(),
    )))
}

impl Session {
    pub fn new(config: Config, runner: Box<dyn JobRunner>) -> Self {
        let signing = SigningFlow::new(config.highlight_duration(), config.indicator_duration());
        Self {
            config,
            runner,
            document: None,
            pending: None,
            loading: false,
            processing: false,
            progress: None,
            store: FieldStore::new(),
            modes: ModeController::new(),
            signing,
            drag: None,
            zoom: 1.0,
            notices: Vec::new(),
            sinks: Vec::new(),
            last_export: None,
            pending_download: None,
        }
    }

    /// Session whose jobs run synchronously on the calling thread.
    pub fn inline(config: Config) -> Self {
        let runner = InlineRunner::new(uploader_from_config(&config));
        Self::new(config, Box::new(runner))
    }

    /// Session with a background worker thread for decoding and export.
    pub fn threaded(config: Config) -> std::io::Result<Self> {
        let worker = JobWorker::new(uploader_from_config(&config))?;
        Ok(Self::new(config, Box::new(worker)))
    }

    pub fn add_sink(&mut self, sink: Box<dyn CompletionSink>) {
        self.sinks.push(sink);
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => log::error!("{}", message),
            NoticeLevel::Warning => log::warn!("{}", message),
            _ => log::info!("{}", message),
        }
        self.notices.push(Notice { level, message });
    }

    /// Drain pending notices, oldest first.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn fail<T>(&mut self, err: SignError) -> Result<T> {
        self.notify(NoticeLevel::Error, err.to_string());
        Err(err)
    }

    /// A load or export is running; anything that would change the
    /// document or its fields must wait.
    fn busy(&self) -> bool {
        self.loading || self.processing
    }

    // --- state ---

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn modes(&self) -> &ModeController {
        &self.modes
    }

    pub fn signing(&self) -> &SigningFlow {
        &self.signing
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn export_progress(&self) -> Option<ExportProgress> {
        self.progress
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    pub fn page_count(&self) -> usize {
        self.document.as_ref().map_or(0, |d| d.page_sizes.len())
    }

    pub fn page_size(&self, page: usize) -> Option<PageDims> {
        let doc = self.document.as_ref()?;
        page.checked_sub(1).and_then(|i| doc.page_sizes.get(i)).copied()
    }

    pub fn last_export(&self) -> Option<&CompletedExport> {
        self.last_export.as_ref()
    }

    pub fn signatures_remaining(&self) -> usize {
        self.store.remaining(FieldType::Signature)
    }

    pub fn initials_remaining(&self) -> usize {
        self.store.remaining(FieldType::Initial)
    }

    pub fn can_complete(&self) -> bool {
        self.mode() == Mode::Signing && self.store.all_filled() && !self.processing
    }

    // --- document loading ---

    /// Load a PDF. The content type is checked before anything else changes.
    pub fn load_pdf(
        &mut self,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        source_url: &str,
    ) -> Result<()> {
        match DocumentSource::from_pdf_bytes(bytes, declared_mime) {
            Ok(source) => self.begin_load(source, source_url),
            Err(e) => self.fail(e),
        }
    }

    /// Load a document from pre-rendered page images.
    pub fn load_images(&mut self, pages: Vec<PageImage>, source_url: &str) -> Result<()> {
        self.begin_load(DocumentSource::from_images(pages), source_url)
    }

    fn begin_load(&mut self, source: DocumentSource, source_url: &str) -> Result<()> {
        if self.busy() {
            return self.fail(SignError::Busy);
        }
        self.loading = true;
        self.pending = Some((source.clone(), source_url.to_string()));
        if !self.runner.submit(Job::Open { source }) {
            self.loading = false;
            self.pending = None;
            return self.fail(SignError::Busy);
        }
        self.pump();
        Ok(())
    }

    fn finish_load(&mut self, result: Result<DocumentInfo>) {
        self.loading = false;
        let pending = self.pending.take();
        match (result, pending) {
            (Ok(info), Some((source, source_url))) => {
                let pages = info.page_sizes.len();
                self.document = Some(LoadedDocument {
                    source,
                    source_url,
                    page_sizes: info.page_sizes,
                });
                self.drag = None;
                self.last_export = None;
                let dropped = self.store.retain_pages(pages);
                if dropped > 0 {
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Removed {} field(s) on pages this document lacks", dropped),
                    );
                }
                self.fit_fields_to_pages();
                self.notify(NoticeLevel::Success, format!("PDF loaded ({} pages)", pages));
            }
            (Ok(_), None) => log::warn!("Decode finished with no pending document"),
            (Err(e), _) => {
                self.document = None;
                self.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    /// Apply every event the runner has ready. Returns true if any arrived.
    pub fn pump(&mut self) -> bool {
        let mut any = false;
        while let Some(event) = self.runner.poll() {
            self.handle_event(event);
            any = true;
        }
        any
    }

    /// Block until no load or export is outstanding, or until a wait for the
    /// next event times out.
    pub fn wait_idle(&mut self, timeout: Duration) {
        self.pump();
        while self.loading || self.processing {
            match self.runner.wait(timeout) {
                Some(event) => self.handle_event(event),
                None => {
                    log::warn!("Timed out waiting for background job");
                    break;
                }
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress(p) => {
                log::debug!("Export progress {}/{}", p.page, p.total);
                self.progress = Some(p);
            }
            WorkerEvent::Opened(result) => self.finish_load(result),
            WorkerEvent::Completed(result) => self.finish_complete(result),
            WorkerEvent::Exported(result) => self.finish_download(result),
        }
    }

    // --- view ---

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        let dragged_page = self
            .drag
            .as_ref()
            .and_then(|d| self.store.get(&d.field_id))
            .map(|f| f.page);
        if let Some(page) = dragged_page {
            let view = self.page_view(page);
            if let Some(drag) = self.drag.as_mut() {
                drag.set_view(view);
            }
        }
    }

    /// Zoom so the widest page fills `viewport_width`.
    pub fn fit_width(&mut self, viewport_width: f64) {
        let widest = self
            .document
            .as_ref()
            .and_then(|d| d.page_sizes.iter().map(|p| p.width).reduce(f64::max));
        if let Some(widest) = widest {
            if widest > 0.0 && viewport_width > 0.0 {
                self.set_zoom(viewport_width / widest);
            }
        }
    }

    /// How `page` is currently displayed.
    pub fn page_view(&self, page: usize) -> PageView {
        PageView::at_zoom(PageDims::or_default(self.page_size(page)), self.zoom)
    }

    // --- editor ---

    fn editing(&self) -> bool {
        self.modes.mode() == Mode::Editor && !self.busy()
    }

    /// Place a field where the user clicked on `page`. `pointer` is in
    /// rendered pixels relative to the page surface.
    pub fn place_field(&mut self, page: usize, pointer: Point, field_type: FieldType) -> Option<String> {
        if !self.editing() || self.page_size(page).is_none() {
            return None;
        }
        let view = self.page_view(page);
        let native = view.to_native(pointer);
        let id = self.store.add_field(native.x, native.y, page, field_type);
        self.store.move_field(&id, native.x, native.y, page, view.original);
        Some(id)
    }

    pub fn begin_drag(&mut self, field_id: &str, pointer: Point, on_control: bool) -> bool {
        if !self.editing() {
            return false;
        }
        let Some(page) = self.store.get(field_id).map(|f| f.page) else {
            return false;
        };
        self.drag = FieldDrag::begin(&self.store, field_id, pointer, self.page_view(page), on_control);
        self.drag.is_some()
    }

    pub fn drag_to(&mut self, pointer: Point) {
        if let Some(drag) = &self.drag {
            drag.update(&mut self.store, pointer);
        }
    }

    /// Pointer released or cancelled.
    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn delete_field(&mut self, field_id: &str) -> bool {
        if !self.editing() {
            return false;
        }
        if self.drag.as_ref().is_some_and(|d| d.field_id == field_id) {
            self.drag = None;
        }
        self.store.delete_field(field_id)
    }

    pub fn change_field_type(&mut self, field_id: &str, field_type: FieldType) {
        if self.editing() {
            self.store.change_field_type(field_id, field_type);
        }
    }

    // --- layout ---

    pub fn layout(&self) -> DocumentLayout {
        let source_url = self
            .document
            .as_ref()
            .map(|d| d.source_url.clone())
            .unwrap_or_default();
        DocumentLayout::new(source_url, self.store.fields().to_vec())
    }

    /// Write the layout to `dir` under a timestamped name.
    pub fn save_layout(&mut self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(layout::layout_file_name(Utc::now().timestamp_millis()));
        match self.layout().save(&path) {
            Ok(()) => {
                self.notify(NoticeLevel::Success, "Layout exported");
                Ok(path)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Replace all fields with those of a layout. Fill state is discarded.
    /// On a parse failure nothing changes.
    pub fn import_layout_json(&mut self, json: &str) -> Result<()> {
        if self.busy() {
            return self.fail(SignError::Busy);
        }
        let layout = match DocumentLayout::from_json(json) {
            Ok(layout) => layout,
            Err(e) => return self.fail(e),
        };
        self.drag = None;
        self.signing.reset();
        self.store.replace_all(layout.fields);
        let renamed = self.store.dedupe_ids();
        if renamed > 0 {
            self.notify(
                NoticeLevel::Warning,
                format!("Gave {} field(s) with duplicate ids new ids", renamed),
            );
        }
        if self.document.is_some() {
            let pages = self.page_count();
            let dropped = self.store.retain_pages(pages);
            if dropped > 0 {
                self.notify(
                    NoticeLevel::Warning,
                    format!("Skipped {} field(s) on pages this document lacks", dropped),
                );
            }
            self.fit_fields_to_pages();
        }
        if self.mode() == Mode::Signing {
            self.store.fill_dates();
        }
        self.notify(
            NoticeLevel::Success,
            format!("Layout loaded ({} fields)", self.store.len()),
        );
        Ok(())
    }

    /// Move fields that hang off their page back onto it.
    fn fit_fields_to_pages(&mut self) {
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        let sizes = &doc.page_sizes;
        let moved = self.store.clamp_to_pages(|page| {
            PageDims::or_default(page.checked_sub(1).and_then(|i| sizes.get(i)).copied())
        });
        if moved > 0 {
            self.notify(
                NoticeLevel::Warning,
                format!("Moved {} field(s) back inside their page", moved),
            );
        }
    }

    pub fn load_layout(&mut self, path: &Path) -> Result<()> {
        match std::fs::read_to_string(path) {
            Ok(json) => self.import_layout_json(&json),
            Err(e) => self.fail(e.into()),
        }
    }

    // --- modes ---

    pub fn request_mode(&mut self, target: Mode) -> Transition {
        if self.mode_locked() {
            return Transition::Unchanged;
        }
        let transition = self.modes.request(target, &mut self.store);
        self.after_transition(transition);
        transition
    }

    pub fn grant_consent(&mut self) -> Transition {
        if self.mode_locked() {
            return Transition::Unchanged;
        }
        let transition = self.modes.grant_consent(&mut self.store);
        self.after_transition(transition);
        transition
    }

    pub fn decline_consent(&mut self) -> Transition {
        self.modes.decline_consent()
    }

    fn mode_locked(&mut self) -> bool {
        if self.processing {
            self.notify(NoticeLevel::Warning, "Wait for the signed document to finish");
        }
        self.processing
    }

    fn after_transition(&mut self, transition: Transition) {
        if let Transition::Entered(mode) = transition {
            self.drag = None;
            self.signing.reset();
            if mode == Mode::Signing {
                self.signing.scroll_to_next(&self.store, Instant::now());
            }
        }
    }

    // --- signing ---

    /// The user clicked a field while signing.
    pub fn activate_field(&mut self, field_id: &str) -> Activation {
        if self.mode() != Mode::Signing || self.processing {
            return Activation::Ignored;
        }
        let activation =
            self.signing
                .activate(&mut self.store, self.modes.cache(), field_id, Instant::now());
        if let Activation::AutoApplied { next } = &activation {
            self.announce_next(next);
        }
        activation
    }

    /// Apply a captured image to the field waiting on the capture interface.
    pub fn apply_capture(&mut self, value: &str) -> Result<Option<NextField>> {
        if self.processing {
            return self.fail(SignError::Busy);
        }
        let result = self.signing.apply(
            &mut self.store,
            self.modes.cache_mut(),
            value,
            Instant::now(),
        );
        match result {
            Ok(next) => {
                if let Some(next) = &next {
                    self.announce_next(next);
                }
                Ok(next)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Render `text` in a script face and apply it.
    pub fn apply_typed(&mut self, text: &str) -> Result<Option<NextField>> {
        match capture::render_typed(text) {
            Ok(url) => self.apply_capture(&url),
            Err(e) => self.fail(e),
        }
    }

    pub fn cancel_capture(&mut self) {
        self.signing.cancel();
    }

    /// What the typed-capture box starts with for `field_type`.
    pub fn typed_default(&self, field_type: FieldType) -> String {
        let first = self.config.signer_first_name.trim();
        let last = self.config.signer_last_name.trim();
        match field_type {
            FieldType::Initial => capture::initials_of(first, last),
            _ => format!("{} {}", first, last).trim().to_string(),
        }
    }

    /// "Next signature": highlight the first unfilled field in reading order.
    pub fn next_field(&mut self) -> NextField {
        let next = self.signing.scroll_to_next(&self.store, Instant::now());
        self.announce_next(&next);
        next
    }

    fn announce_next(&mut self, next: &NextField) {
        if *next == NextField::AllComplete {
            self.notify(NoticeLevel::Info, "All fields complete");
        }
    }

    /// Expire timed highlights. Returns true while any is still showing.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.signing.tick(now)
    }

    // --- completion ---

    /// Render the signed document and, if `upload` is given, send it to the
    /// configured endpoint. At most one completion runs at a time.
    pub fn complete(&mut self, upload: Option<UploadPlan>) -> Result<()> {
        if self.busy() || self.runner.is_in_flight(JobKind::Complete) {
            return self.fail(SignError::Busy);
        }
        let Some(doc) = self.document.as_ref() else {
            return self.fail(SignError::NoDocument);
        };
        let source = doc.source.clone();
        let unfilled = self.store.fields().iter().filter(|f| !f.is_filled).count();
        if unfilled > 0 {
            return self.fail(SignError::Incomplete(unfilled));
        }

        let job = Job::Complete {
            source,
            fields: self.store.fields().to_vec(),
            options: self.config.export_options(),
            file_name: export::signed_file_name(Utc::now().timestamp_millis()),
            upload,
        };
        self.processing = true;
        self.progress = None;
        if !self.runner.submit(job) {
            self.processing = false;
            return self.fail(SignError::Busy);
        }
        self.pump();
        Ok(())
    }

    fn finish_complete(&mut self, result: Result<CompletedExport>) {
        self.processing = false;
        self.progress = None;
        let done = match result {
            Ok(done) => done,
            Err(e) => {
                self.notify(NoticeLevel::Error, e.to_string());
                return;
            }
        };

        match &done.upload {
            Some(outcome) => {
                self.notify(NoticeLevel::Success, "Document uploaded successfully");
                if let Some(db_error) = &outcome.receipt.db_error {
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Document stored but not recorded: {}", db_error),
                    );
                }
                if let Some(metadata_error) = &outcome.metadata_error {
                    self.notify(NoticeLevel::Warning, metadata_error.clone());
                }
            }
            None => self.notify(NoticeLevel::Success, "Signed document ready"),
        }

        let source_url = self
            .document
            .as_ref()
            .map(|d| d.source_url.clone())
            .unwrap_or_default();
        let layout = DocumentLayout::new(source_url, done.fields.clone());
        let event = CompletionEvent::new(layout, Utc::now());
        for sink in &mut self.sinks {
            sink.post_event(&event);
            sink.post_signal(COMPLETION_SIGNAL);
        }
        self.last_export = Some(done);
    }

    /// Write the signed document to `path`. The last completed export is
    /// reused when nothing has changed since; otherwise the document is
    /// rendered by the runner and written once the job finishes.
    pub fn download(&mut self, path: &Path) -> Result<()> {
        if self.busy() {
            return self.fail(SignError::Busy);
        }
        let Some(doc) = self.document.as_ref() else {
            return self.fail(SignError::NoDocument);
        };
        let source = doc.source.clone();
        let options = self.config.export_options();

        let reusable = self
            .last_export
            .as_ref()
            .filter(|done| done.fields.as_slice() == self.store.fields() && done.options == options);
        if let Some(done) = reusable {
            let written = done.pdf.write_to(path);
            return self.report_download(written);
        }

        let job = Job::Export {
            source,
            fields: self.store.fields().to_vec(),
            options,
        };
        self.processing = true;
        self.progress = None;
        self.pending_download = Some(path.to_path_buf());
        if !self.runner.submit(job) {
            self.processing = false;
            self.pending_download = None;
            return self.fail(SignError::Busy);
        }
        self.pump();
        Ok(())
    }

    fn finish_download(&mut self, result: Result<SignedPdf>) {
        self.processing = false;
        self.progress = None;
        let path = self.pending_download.take();
        match (result, path) {
            (Ok(pdf), Some(path)) => match pdf.write_to(&path) {
                Ok(()) => self.notify(NoticeLevel::Success, "PDF downloaded!"),
                Err(e) => self.notify(NoticeLevel::Error, e.to_string()),
            },
            (Ok(_), None) => log::warn!("Export finished with no download pending"),
            (Err(e), _) => self.notify(NoticeLevel::Error, e.to_string()),
        }
    }

    fn report_download(&mut self, written: Result<()>) -> Result<()> {
        match written {
            Ok(()) => {
                self.notify(NoticeLevel::Success, "PDF downloaded!");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }
}
