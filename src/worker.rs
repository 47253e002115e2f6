use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Result, SignError};
use crate::export::{self, ExportOptions, ExportProgress, SignedPdf};
use crate::field::SignatureField;
use crate::geometry::PageDims;
use crate::source::DocumentSource;
use crate::upload::{MetadataNotice, UploadReceipt, UploadRequest, Uploader};

const THUMBNAIL_EDGE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Open,
    Complete,
    Export,
}

/// What to do with the signed document after rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPlan {
    pub record_id: Option<String>,
    pub with_thumbnail: bool,
}

pub enum Job {
    /// Decode the document and read its page sizes.
    Open { source: DocumentSource },
    /// Render the signed document and optionally upload it.
    Complete {
        source: DocumentSource,
        fields: Vec<SignatureField>,
        options: ExportOptions,
        file_name: String,
        upload: Option<UploadPlan>,
    },
    /// Render the signed document only (download).
    Export {
        source: DocumentSource,
        fields: Vec<SignatureField>,
        options: ExportOptions,
    },
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Open { .. } => JobKind::Open,
            Job::Complete { .. } => JobKind::Complete,
            Job::Export { .. } => JobKind::Export,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub page_sizes: Vec<PageDims>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub receipt: UploadReceipt,
    /// Set when the metadata callback failed after a successful upload.
    pub metadata_error: Option<String>,
}

/// A finished completion. `fields` and `options` are exactly what was
/// rendered into `pdf`.
#[derive(Debug, Clone)]
pub struct CompletedExport {
    pub pdf: SignedPdf,
    pub file_name: String,
    pub fields: Vec<SignatureField>,
    pub options: ExportOptions,
    pub upload: Option<UploadOutcome>,
}

pub enum WorkerEvent {
    Progress(ExportProgress),
    Opened(Result<DocumentInfo>),
    Completed(Result<CompletedExport>),
    Exported(Result<SignedPdf>),
}

impl WorkerEvent {
    fn finished_kind(&self) -> Option<JobKind> {
        match self {
            WorkerEvent::Progress(_) => None,
            WorkerEvent::Opened(_) => Some(JobKind::Open),
            WorkerEvent::Completed(_) => Some(JobKind::Complete),
            WorkerEvent::Exported(_) => Some(JobKind::Export),
        }
    }

    /// The terminal event for a job of `kind` that failed with `err`.
    pub fn failed(kind: JobKind, err: SignError) -> Self {
        match kind {
            JobKind::Open => WorkerEvent::Opened(Err(err)),
            JobKind::Complete => WorkerEvent::Completed(Err(err)),
            JobKind::Export => WorkerEvent::Exported(Err(err)),
        }
    }
}

/// Execute one job on the current thread, reporting progress through `emit`.
pub fn run_job(job: Job, uploader: Option<&dyn Uploader>, emit: &mut dyn FnMut(WorkerEvent)) {
    match job {
        Job::Open { source } => {
            let result = source.open().and_then(|doc| doc.page_sizes());
            emit(WorkerEvent::Opened(
                result.map(|page_sizes| DocumentInfo { page_sizes }),
            ));
        }
        Job::Complete {
            source,
            fields,
            options,
            file_name,
            upload,
        } => {
            let result = complete(source, fields, options, file_name, upload, uploader, emit);
            emit(WorkerEvent::Completed(result));
        }
        Job::Export {
            source,
            fields,
            options,
        } => {
            let result = source.open().and_then(|doc| {
                export::render_signed_pdf(doc.as_ref(), &fields, &options, &mut |p| {
                    emit(WorkerEvent::Progress(p))
                })
            });
            emit(WorkerEvent::Exported(result));
        }
    }
}

/// Like [`run_job`], but a panic inside the job is reported as that job's
/// failure instead of unwinding into the caller.
pub fn run_job_guarded(
    job: Job,
    uploader: Option<&dyn Uploader>,
    emit: &mut dyn FnMut(WorkerEvent),
) {
    let kind = job.kind();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_job(job, uploader, &mut *emit)));
    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        log::error!("{:?} job panicked: {}", kind, reason);
        emit(WorkerEvent::failed(kind, SignError::Worker(reason)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn complete(
    source: DocumentSource,
    fields: Vec<SignatureField>,
    options: ExportOptions,
    file_name: String,
    upload: Option<UploadPlan>,
    uploader: Option<&dyn Uploader>,
    emit: &mut dyn FnMut(WorkerEvent),
) -> Result<CompletedExport> {
    let doc = source.open()?;
    let pdf = export::render_signed_pdf(doc.as_ref(), &fields, &options, &mut |p| {
        emit(WorkerEvent::Progress(p))
    })?;

    let upload = match upload {
        None => None,
        Some(plan) => {
            let uploader = uploader
                .ok_or_else(|| SignError::Upload("no upload endpoint configured".into()))?;
            let thumbnail_base64 = if plan.with_thumbnail {
                export::thumbnail(doc.as_ref(), THUMBNAIL_EDGE)
                    .map_err(|e| log::warn!("Skipping thumbnail: {}", e))
                    .ok()
            } else {
                None
            };
            let request = UploadRequest {
                pdf_base64: pdf.to_base64(),
                file_name: file_name.clone(),
                record_id: plan.record_id.clone(),
                thumbnail_base64,
            };
            let receipt = uploader.upload(&request)?;
            let metadata_error = receipt.blob_url.as_ref().and_then(|blob_url| {
                let notice = MetadataNotice {
                    file_name: receipt.file_name.clone(),
                    blob_url: blob_url.clone(),
                    record_id: plan.record_id.clone(),
                };
                uploader.notify_metadata(&notice).err().map(|e| {
                    log::warn!("{}", e);
                    e.to_string()
                })
            });
            Some(UploadOutcome {
                receipt,
                metadata_error,
            })
        }
    };

    Ok(CompletedExport {
        pdf,
        file_name,
        fields,
        options,
        upload,
    })
}

/// Something that accepts jobs and hands back their events.
pub trait JobRunner {
    /// Returns false if a job of the same kind is already in flight.
    fn submit(&mut self, job: Job) -> bool;

    /// Non-blocking poll for the next event.
    fn poll(&mut self) -> Option<WorkerEvent>;

    /// Block up to `timeout` for the next event.
    fn wait(&mut self, timeout: Duration) -> Option<WorkerEvent>;

    fn is_in_flight(&self, kind: JobKind) -> bool;
}

/// Runs jobs on a dedicated background thread. The document is opened
/// inside the thread for every job.
pub struct JobWorker {
    tx: mpsc::Sender<Job>,
    rx: mpsc::Receiver<WorkerEvent>,
    in_flight: HashSet<JobKind>,
}

impl JobWorker {
    pub fn new(uploader: Option<Box<dyn Uploader>>) -> std::io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();

        thread::Builder::new()
            .name("document-worker".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let kind = job.kind();
                    log::info!("Worker running {:?} job", kind);
                    let mut disconnected = false;
                    run_job_guarded(job, uploader.as_deref(), &mut |event| {
                        if event_tx.send(event).is_err() {
                            disconnected = true;
                        }
                    });
                    if disconnected {
                        break; // session dropped its receiver
                    }
                }
                log::info!("Document worker thread exiting");
            })?;

        Ok(Self {
            tx: job_tx,
            rx: event_rx,
            in_flight: HashSet::new(),
        })
    }

    fn track(&mut self, event: WorkerEvent) -> WorkerEvent {
        if let Some(kind) = event.finished_kind() {
            self.in_flight.remove(&kind);
        }
        event
    }

    /// The worker thread is gone: fail one outstanding job so its owner can
    /// leave the blocking state.
    fn abandon_one(&mut self) -> Option<WorkerEvent> {
        let kind = self.in_flight.iter().next().copied()?;
        self.in_flight.remove(&kind);
        log::error!("Document worker stopped with a {:?} job outstanding", kind);
        Some(WorkerEvent::failed(
            kind,
            SignError::Worker("document worker stopped".into()),
        ))
    }
}

impl JobRunner for JobWorker {
    fn submit(&mut self, job: Job) -> bool {
        let kind = job.kind();
        if !self.in_flight.insert(kind) {
            return false;
        }
        if self.tx.send(job).is_err() {
            self.in_flight.remove(&kind);
            return false;
        }
        true
    }

    fn poll(&mut self) -> Option<WorkerEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(self.track(event)),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => self.abandon_one(),
        }
    }

    fn wait(&mut self, timeout: Duration) -> Option<WorkerEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(self.track(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => self.abandon_one(),
        }
    }

    fn is_in_flight(&self, kind: JobKind) -> bool {
        self.in_flight.contains(&kind)
    }
}

/// Runs each job to completion inside `submit` and queues its events.
#[derive(Default)]
pub struct InlineRunner {
    uploader: Option<Box<dyn Uploader>>,
    queue: VecDeque<WorkerEvent>,
}

impl InlineRunner {
    pub fn new(uploader: Option<Box<dyn Uploader>>) -> Self {
        Self {
            uploader,
            queue: VecDeque::new(),
        }
    }
}

impl JobRunner for InlineRunner {
    fn submit(&mut self, job: Job) -> bool {
        let queue = &mut self.queue;
        run_job_guarded(job, self.uploader.as_deref(), &mut |event| queue.push_back(event));
        true
    }

    fn poll(&mut self) -> Option<WorkerEvent> {
        self.queue.pop_front()
    }

    fn wait(&mut self, _timeout: Duration) -> Option<WorkerEvent> {
        self.queue.pop_front()
    }

    fn is_in_flight(&self, _kind: JobKind) -> bool {
        false
    }
}
