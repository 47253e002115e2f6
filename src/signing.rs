use std::time::{Duration, Instant};

use crate::error::{Result, SignError};
use crate::field::{is_image_data, FieldType};
use crate::mode::CredentialCache;
use crate::store::FieldStore;

pub const HIGHLIGHT_DURATION_MS: u64 = 1500;
pub const AUTO_APPLY_INDICATOR_MS: u64 = 300;

/// What the capture interface is asked to do: capture a value for a field of
/// `field_type`, optionally starting from an existing image.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub field_id: String,
    pub field_type: FieldType,
    pub existing: Option<String>,
}

impl CaptureRequest {
    /// Editing an already-filled field rather than filling a fresh one.
    pub fn is_edit(&self) -> bool {
        self.existing.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextField {
    Field(String),
    AllComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Nothing happens for this field (dates, unknown ids, capture already open).
    Ignored,
    /// A saved credential was applied without prompting.
    AutoApplied { next: NextField },
    /// The capture interface must be opened.
    Prompt(CaptureRequest),
}

struct Highlight {
    field_id: String,
    until: Instant,
}

/// Drives field activation while signing: auto-apply from the credential
/// cache, capture prompts, edit propagation, and next-field navigation.
pub struct SigningFlow {
    pending: Option<CaptureRequest>,
    highlight: Option<Highlight>,
    processing_until: Option<Instant>,
    highlight_duration: Duration,
    indicator_duration: Duration,
}

impl Default for SigningFlow {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(HIGHLIGHT_DURATION_MS),
            Duration::from_millis(AUTO_APPLY_INDICATOR_MS),
        )
    }
}

impl SigningFlow {
    pub fn new(highlight_duration: Duration, indicator_duration: Duration) -> Self {
        Self {
            pending: None,
            highlight: None,
            processing_until: None,
            highlight_duration,
            indicator_duration,
        }
    }

    pub fn pending_capture(&self) -> Option<&CaptureRequest> {
        self.pending.as_ref()
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlight.as_ref().map(|h| h.field_id.as_str())
    }

    /// True while the brief auto-apply indicator should be shown.
    pub fn is_indicating(&self) -> bool {
        self.processing_until.is_some()
    }

    pub fn activate(
        &mut self,
        store: &mut FieldStore,
        cache: &CredentialCache,
        field_id: &str,
        now: Instant,
    ) -> Activation {
        if self.pending.is_some() {
            return Activation::Ignored;
        }
        let Some(field) = store.get(field_id) else {
            return Activation::Ignored;
        };
        if field.field_type == FieldType::Date {
            return Activation::Ignored;
        }

        let field_type = field.field_type;
        if field.is_filled {
            let request = CaptureRequest {
                field_id: field.id.clone(),
                field_type,
                existing: field.value.clone(),
            };
            self.pending = Some(request.clone());
            return Activation::Prompt(request);
        }

        if let Some(saved) = cache.get(field_type) {
            store.fill_field(field_id, saved);
            self.processing_until = Some(now + self.indicator_duration);
            log::info!("Auto-applied saved {} to field {}", field_type, field_id);
            let next = self.scroll_to_next(store, now);
            return Activation::AutoApplied { next };
        }

        let request = CaptureRequest {
            field_id: field_id.to_string(),
            field_type,
            existing: None,
        };
        self.pending = Some(request.clone());
        Activation::Prompt(request)
    }

    /// Apply a captured image to the pending request. Editing replaces the
    /// value of every filled field of the same type; a first fill only
    /// touches the activated field and then moves on to the next one.
    pub fn apply(
        &mut self,
        store: &mut FieldStore,
        cache: &mut CredentialCache,
        value: &str,
        now: Instant,
    ) -> Result<Option<NextField>> {
        if self.pending.is_none() {
            return Ok(None);
        }
        if !is_image_data(value) {
            return Err(SignError::InvalidImage(
                "captured value is not image data".to_string(),
            ));
        }
        let Some(request) = self.pending.take() else {
            return Ok(None);
        };

        cache.set(request.field_type, value);
        if request.is_edit() {
            let changed = store.refill_type(request.field_type, value);
            log::info!("Updated {} filled {} field(s)", changed, request.field_type);
            Ok(None)
        } else {
            store.fill_field(&request.field_id, value);
            Ok(Some(self.scroll_to_next(store, now)))
        }
    }

    /// Close the capture interface without applying anything.
    pub fn cancel(&mut self) -> Option<CaptureRequest> {
        self.pending.take()
    }

    /// Highlight the first unfilled field in reading order.
    pub fn scroll_to_next(&mut self, store: &FieldStore, now: Instant) -> NextField {
        match store.next_unfilled() {
            Some(field) => {
                self.highlight = Some(Highlight {
                    field_id: field.id.clone(),
                    until: now + self.highlight_duration,
                });
                NextField::Field(field.id.clone())
            }
            None => {
                self.highlight = None;
                NextField::AllComplete
            }
        }
    }

    /// Expire the highlight and the auto-apply indicator. Returns true while
    /// either is still active.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.highlight.as_ref().is_some_and(|h| now >= h.until) {
            self.highlight = None;
        }
        if self.processing_until.is_some_and(|t| now >= t) {
            self.processing_until = None;
        }
        self.highlight.is_some() || self.processing_until.is_some()
    }

    /// Forget all transient state (used when leaving signing mode).
    pub fn reset(&mut self) {
        self.pending = None;
        self.highlight = None;
        self.processing_until = None;
    }
}
