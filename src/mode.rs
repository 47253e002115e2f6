use serde::{Deserialize, Serialize};
use std::fmt;

use crate::field::FieldType;
use crate::store::FieldStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Editor,
    Signing,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Editor => write!(f, "editor"),
            Mode::Signing => write!(f, "signing"),
        }
    }
}

/// Most recently applied signature and initial images for this signing
/// session. Rebuilt from field state on every entry into signing mode and
/// emptied on return to the editor; never persisted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CredentialCache {
    signature: Option<String>,
    initial: Option<String>,
}

impl CredentialCache {
    pub fn get(&self, field_type: FieldType) -> Option<&str> {
        match field_type {
            FieldType::Signature => self.signature.as_deref(),
            FieldType::Initial => self.initial.as_deref(),
            FieldType::Date => None,
        }
    }

    pub fn has(&self, field_type: FieldType) -> bool {
        self.get(field_type).is_some()
    }

    pub fn set(&mut self, field_type: FieldType, value: &str) {
        match field_type {
            FieldType::Signature => self.signature = Some(value.to_string()),
            FieldType::Initial => self.initial = Some(value.to_string()),
            FieldType::Date => {}
        }
    }

    pub fn clear(&mut self) {
        self.signature = None;
        self.initial = None;
    }

    /// Restore from the first filled field of each type, in store order.
    fn rebuild_from(&mut self, store: &FieldStore) {
        self.signature = store
            .first_filled_value(FieldType::Signature)
            .map(str::to_string);
        self.initial = store
            .first_filled_value(FieldType::Initial)
            .map(str::to_string);
    }
}

/// Outcome of a mode change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The mode changed (or was re-entered) to the given mode.
    Entered(Mode),
    /// Signing needs consent first; a consent prompt is now pending.
    ConsentRequired,
    /// Nothing to do (e.g. consent answered with no prompt open).
    Unchanged,
}

/// Two-state machine: editor <-> signing. Entering signing is gated on
/// consent; returning to the editor is unconditional.
#[derive(Debug, Default)]
pub struct ModeController {
    mode: Mode,
    consent_given: bool,
    consent_pending: bool,
    cache: CredentialCache,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn consent_given(&self) -> bool {
        self.consent_given
    }

    pub fn consent_pending(&self) -> bool {
        self.consent_pending
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CredentialCache {
        &mut self.cache
    }

    pub fn request(&mut self, target: Mode, store: &mut FieldStore) -> Transition {
        match target {
            Mode::Signing if !self.consent_given => {
                self.consent_pending = true;
                log::info!("Signing requested without consent, prompting");
                Transition::ConsentRequired
            }
            Mode::Signing => {
                self.enter_signing(store);
                Transition::Entered(Mode::Signing)
            }
            Mode::Editor => {
                self.enter_editor();
                Transition::Entered(Mode::Editor)
            }
        }
    }

    /// The user agreed in the consent prompt.
    pub fn grant_consent(&mut self, store: &mut FieldStore) -> Transition {
        if !self.consent_pending {
            return Transition::Unchanged;
        }
        self.consent_pending = false;
        self.consent_given = true;
        self.enter_signing(store);
        Transition::Entered(Mode::Signing)
    }

    /// The user dismissed the consent prompt.
    pub fn decline_consent(&mut self) -> Transition {
        if self.consent_pending {
            self.consent_pending = false;
            log::info!("Consent declined, staying in {} mode", self.mode);
        }
        Transition::Unchanged
    }

    fn enter_signing(&mut self, store: &mut FieldStore) {
        self.mode = Mode::Signing;
        self.cache.rebuild_from(store);
        store.fill_dates();
        log::info!(
            "Entered signing mode (saved signature: {}, saved initial: {})",
            self.cache.has(FieldType::Signature),
            self.cache.has(FieldType::Initial)
        );
    }

    fn enter_editor(&mut self) {
        self.mode = Mode::Editor;
        self.cache.clear();
        log::info!("Entered editor mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG_A: &str = "data:image/png;base64,AAAA";
    const SIG_B: &str = "data:image/png;base64,BBBB";

    #[test]
    fn test_signing_requires_consent() {
        let mut store = FieldStore::new();
        let mut modes = ModeController::new();
        assert_eq!(modes.request(Mode::Signing, &mut store), Transition::ConsentRequired);
        assert_eq!(modes.mode(), Mode::Editor);
        assert!(modes.consent_pending());

        assert_eq!(modes.decline_consent(), Transition::Unchanged);
        assert_eq!(modes.mode(), Mode::Editor);
        assert_eq!(modes.grant_consent(&mut store), Transition::Unchanged);
        assert_eq!(modes.mode(), Mode::Editor);

        modes.request(Mode::Signing, &mut store);
        assert_eq!(
            modes.grant_consent(&mut store),
            Transition::Entered(Mode::Signing)
        );
        assert_eq!(modes.mode(), Mode::Signing);

        // Consent is remembered for the session.
        modes.request(Mode::Editor, &mut store);
        assert_eq!(
            modes.request(Mode::Signing, &mut store),
            Transition::Entered(Mode::Signing)
        );
    }

    #[test]
    fn test_entering_signing_rebuilds_cache_and_fills_dates() {
        let mut store = FieldStore::new();
        let s1 = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        let s2 = store.add_field(0.0, 100.0, 1, FieldType::Signature);
        let d = store.add_field(0.0, 200.0, 1, FieldType::Date);
        store.fill_field(&s1, SIG_A);
        store.fill_field(&s2, SIG_B);
        // A stale date from an imported layout.
        let mut fields = store.fields().to_vec();
        fields.iter_mut().filter(|f| f.id == d).for_each(|f| f.clear());
        store.replace_all(fields);

        let mut modes = ModeController::new();
        modes.request(Mode::Signing, &mut store);
        modes.grant_consent(&mut store);

        assert_eq!(modes.cache().get(FieldType::Signature), Some(SIG_A));
        assert_eq!(modes.cache().get(FieldType::Initial), None);
        assert!(store.get(&d).unwrap().is_filled);
    }

    #[test]
    fn test_editor_clears_cache_but_keeps_values() {
        let mut store = FieldStore::new();
        let s = store.add_field(0.0, 0.0, 1, FieldType::Initial);
        store.fill_field(&s, SIG_A);
        let mut modes = ModeController::new();
        modes.request(Mode::Signing, &mut store);
        modes.grant_consent(&mut store);
        assert!(modes.cache().has(FieldType::Initial));

        modes.request(Mode::Editor, &mut store);
        assert_eq!(modes.mode(), Mode::Editor);
        assert!(!modes.cache().has(FieldType::Initial));
        assert_eq!(store.get(&s).unwrap().value.as_deref(), Some(SIG_A));
    }
}
