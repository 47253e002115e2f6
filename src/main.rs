use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use signpad::capture;
use signpad::completion::StdoutSink;
use signpad::config::Config;
use signpad::field::FieldType;
use signpad::mode::{Mode, Transition};
use signpad::session::{NoticeLevel, Session};
use signpad::signing::Activation;
use signpad::worker::UploadPlan;

const JOB_TIMEOUT: Duration = Duration::from_secs(300);

const USAGE: &str = "Usage:
  signpad <input.pdf> --layout <layout.json> (--signature <image> | --name <typed name>)
          [--initials <image>] [--out <signed.pdf>] [--upload] [--record-id <id>] [--agree]
  signpad layout <input.pdf>
  signpad config";

#[derive(Default)]
struct SignArgs {
    input: PathBuf,
    layout: Option<PathBuf>,
    signature: Option<PathBuf>,
    name: Option<String>,
    initials: Option<PathBuf>,
    out: Option<PathBuf>,
    upload: bool,
    record_id: Option<String>,
    agree: bool,
}

fn parse_sign_args(args: &[String]) -> Result<SignArgs> {
    let mut parsed = SignArgs::default();
    let mut input = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{} needs a value", flag))
        };
        match arg.as_str() {
            "--layout" => parsed.layout = Some(value(arg)?.into()),
            "--signature" => parsed.signature = Some(value(arg)?.into()),
            "--name" => parsed.name = Some(value(arg)?),
            "--initials" => parsed.initials = Some(value(arg)?.into()),
            "--out" => parsed.out = Some(value(arg)?.into()),
            "--record-id" => parsed.record_id = Some(value(arg)?),
            "--upload" => parsed.upload = true,
            "--agree" => parsed.agree = true,
            flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
            path if input.is_none() => input = Some(PathBuf::from(path)),
            extra => bail!("Unexpected argument {}", extra),
        }
    }
    parsed.input = input.context("No input PDF given")?;
    Ok(parsed)
}

fn report_notices(session: &mut Session) {
    for notice in session.take_notices() {
        match notice.level {
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
            NoticeLevel::Warning => eprintln!("warning: {}", notice.message),
            _ => eprintln!("{}", notice.message),
        }
    }
}

fn open_session(config: Config, input: &Path) -> Result<Session> {
    let bytes = std::fs::read(input).with_context(|| format!("Reading {}", input.display()))?;
    let mut session = Session::threaded(config)?;
    log::info!("Loading PDF: {}", input.display());
    let loaded = session.load_pdf(bytes, None, &input.display().to_string());
    session.wait_idle(JOB_TIMEOUT);
    report_notices(&mut session);
    loaded?;
    if !session.has_document() {
        bail!("Could not open {}", input.display());
    }
    Ok(session)
}

fn print_layout_skeleton(input: &Path) -> Result<()> {
    let session = open_session(Config::load(), input)?;
    let pages: Vec<_> = (1..=session.page_count())
        .filter_map(|p| session.page_size(p))
        .collect();
    let mut skeleton = serde_json::to_value(session.layout())?;
    skeleton["pages"] = serde_json::to_value(pages)?;
    println!("{}", serde_json::to_string_pretty(&skeleton)?);
    Ok(())
}

/// The image used for fields of `field_type`, from a file or typed text.
fn capture_for(
    session: &Session,
    field_type: FieldType,
    image: Option<&Path>,
    typed: Option<&str>,
) -> Result<String> {
    if let Some(path) = image {
        let bytes = std::fs::read(path).with_context(|| format!("Reading {}", path.display()))?;
        return Ok(capture::image_file_data_url(&bytes)?);
    }
    let text = match (field_type, typed) {
        (FieldType::Initial, Some(name)) => {
            let mut words = name.split_whitespace();
            let first = words.next().unwrap_or_default();
            let last = words.last().unwrap_or_default();
            capture::initials_of(first, last)
        }
        (_, Some(name)) => name.to_string(),
        (_, None) => session.typed_default(field_type),
    };
    if text.is_empty() {
        bail!("No {} given; pass an image or --name", field_type);
    }
    Ok(capture::render_typed(&text)?)
}

fn sign(args: SignArgs) -> Result<()> {
    let config = Config::load();
    let mut session = open_session(config, &args.input)?;
    session.add_sink(Box::new(StdoutSink));

    let layout = args.layout.as_deref().context("--layout is required")?;
    let imported = session.load_layout(layout);
    report_notices(&mut session);
    imported?;

    if session.request_mode(Mode::Signing) == Transition::ConsentRequired {
        if !args.agree {
            bail!("Signing electronically requires consent; pass --agree");
        }
        session.grant_consent();
    }

    let order: Vec<String> = session
        .store()
        .natural_order()
        .iter()
        .map(|f| f.id.clone())
        .collect();
    for id in order {
        match session.activate_field(&id) {
            Activation::Prompt(request) => {
                let image = match request.field_type {
                    FieldType::Initial => args.initials.as_deref(),
                    _ => args.signature.as_deref(),
                };
                let value = capture_for(&session, request.field_type, image, args.name.as_deref())?;
                session.apply_capture(&value)?;
            }
            Activation::AutoApplied { .. } | Activation::Ignored => {}
        }
    }
    report_notices(&mut session);

    let upload = args.upload.then(|| UploadPlan {
        record_id: args.record_id.clone(),
        with_thumbnail: true,
    });
    session.complete(upload)?;
    session.wait_idle(JOB_TIMEOUT);
    report_notices(&mut session);

    let done = session
        .last_export()
        .context("Signing did not complete")?;
    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&done.file_name));
    done.pdf.write_to(&out)?;
    if let Some(url) = done.upload.as_ref().and_then(|u| u.receipt.blob_url.as_deref()) {
        log::info!("Uploaded to {}", url);
    }
    eprintln!("Signed {} page(s) -> {}", done.pdf.page_count(), out.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    if args[1] == "config" {
        let path = Config::write_default();
        eprintln!("Config file: {}", path.display());
        return Ok(());
    }

    if args[1] == "layout" {
        let Some(input) = args.get(2) else {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        };
        return print_layout_skeleton(Path::new(input));
    }

    let parsed = parse_sign_args(&args[1..])?;
    if parsed.signature.is_none() && parsed.name.is_none() {
        log::info!("No --signature or --name; falling back to configured signer name");
    }
    sign(parsed)
}
