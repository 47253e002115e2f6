use std::cmp::Ordering;
use std::collections::HashSet;

use uuid::Uuid;

use crate::field::{self, FieldType, SignatureField};
use crate::geometry::{PageDims, Rect};

/// Ordered collection of placed fields. Order is insertion order; the
/// reading order used for navigation is computed on demand.
#[derive(Debug, Default, Clone)]
pub struct FieldStore {
    fields: Vec<SignatureField>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[SignatureField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SignatureField> {
        self.fields.iter().find(|f| f.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut SignatureField> {
        self.fields.iter_mut().find(|f| f.id == id)
    }

    pub fn on_page(&self, page: usize) -> impl Iterator<Item = &SignatureField> {
        self.fields.iter().filter(move |f| f.page == page)
    }

    /// Place a new field with its type's default size. Returns the new id.
    pub fn add_field(&mut self, x: f64, y: f64, page: usize, field_type: FieldType) -> String {
        let id = Uuid::new_v4().to_string();
        let field = SignatureField::new(id.clone(), field_type, page, x, y, field::today());
        log::debug!("Added {} field {} on page {}", field_type, id, page);
        self.fields.push(field);
        id
    }

    /// Move a field, keeping it fully inside `container` (the page it lands on).
    pub fn move_field(&mut self, id: &str, x: f64, y: f64, page: usize, container: PageDims) {
        let Some(field) = self.get_mut(id) else {
            return;
        };
        let clamped = Rect::new(x, y, field.width, field.height).clamp_to(container);
        field.x = clamped.x;
        field.y = clamped.y;
        field.page = page;
    }

    /// Remove a field. Confirmation happens before this is called.
    pub fn delete_field(&mut self, id: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.id != id);
        before != self.fields.len()
    }

    pub fn change_field_type(&mut self, id: &str, field_type: FieldType) {
        let Some(field) = self.get_mut(id) else {
            return;
        };
        let (width, height) = field_type.default_size();
        field.field_type = field_type;
        field.width = width;
        field.height = height;
        if field_type == FieldType::Date {
            field.fill_date(field::today());
        } else {
            field.clear();
        }
    }

    pub fn fill_field(&mut self, id: &str, value: &str) {
        if let Some(field) = self.get_mut(id) {
            field.value = Some(value.to_string());
            field.is_filled = true;
        }
    }

    /// Replace the value of every already-filled field of `field_type`.
    /// Returns how many fields changed.
    pub fn refill_type(&mut self, field_type: FieldType, value: &str) -> usize {
        let mut changed = 0;
        for field in self
            .fields
            .iter_mut()
            .filter(|f| f.field_type == field_type && f.is_filled)
        {
            field.value = Some(value.to_string());
            changed += 1;
        }
        changed
    }

    /// Fill every date field with `today`.
    pub fn fill_dates(&mut self) {
        let today = field::today();
        for field in self
            .fields
            .iter_mut()
            .filter(|f| f.field_type == FieldType::Date)
        {
            field.fill_date(today);
        }
    }

    /// First filled value for a type, in store order.
    pub fn first_filled_value(&self, field_type: FieldType) -> Option<&str> {
        self.fields
            .iter()
            .filter(|f| f.field_type == field_type)
            .find_map(|f| f.filled_value())
    }

    /// Fields sorted top-to-bottom, left-to-right, page by page.
    pub fn natural_order(&self) -> Vec<&SignatureField> {
        let mut sorted: Vec<&SignatureField> = self.fields.iter().collect();
        sorted.sort_by(|a, b| reading_order(a, b));
        sorted
    }

    pub fn next_unfilled(&self) -> Option<&SignatureField> {
        self.natural_order().into_iter().find(|f| !f.is_filled)
    }

    pub fn remaining(&self, field_type: FieldType) -> usize {
        self.fields
            .iter()
            .filter(|f| f.field_type == field_type && !f.is_filled)
            .count()
    }

    pub fn all_filled(&self) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|f| f.is_filled)
    }

    pub fn replace_all(&mut self, fields: Vec<SignatureField>) {
        self.fields = fields;
    }

    /// Drop fields that point at pages the document does not have.
    pub fn retain_pages(&mut self, page_count: usize) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| f.page >= 1 && f.page <= page_count);
        let dropped = before - self.fields.len();
        if dropped > 0 {
            log::warn!("Dropped {} field(s) referencing missing pages", dropped);
        }
        dropped
    }

    /// Give every field after the first with a given id a fresh one.
    /// Returns how many were renamed.
    pub fn dedupe_ids(&mut self) -> usize {
        let mut seen = HashSet::new();
        let mut renamed = 0;
        for field in &mut self.fields {
            if !seen.insert(field.id.clone()) {
                let id = Uuid::new_v4().to_string();
                log::debug!("Renamed duplicate field id {} to {}", field.id, id);
                field.id = id;
                renamed += 1;
            }
            seen.insert(field.id.clone());
        }
        renamed
    }

    /// Pull every field fully inside its page. Unusable sizes fall back to
    /// the type's default. Returns how many fields changed.
    pub fn clamp_to_pages(&mut self, page_size: impl Fn(usize) -> PageDims) -> usize {
        let mut changed = 0;
        for field in &mut self.fields {
            let (default_w, default_h) = field.field_type.default_size();
            let width = usable_extent(field.width, default_w);
            let height = usable_extent(field.height, default_h);
            let rect = Rect::new(field.x, field.y, width, height).clamp_to(page_size(field.page));
            let before = Rect::new(field.x, field.y, field.width, field.height);
            // NaN never compares equal, so a NaN coordinate always counts.
            if rect != before {
                field.x = rect.x;
                field.y = rect.y;
                field.width = rect.width;
                field.height = rect.height;
                changed += 1;
            }
        }
        changed
    }
}

fn usable_extent(v: f64, default: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        default
    }
}

fn reading_order(a: &SignatureField, b: &SignatureField) -> Ordering {
    a.page
        .cmp(&b.page)
        .then_with(|| a.y.total_cmp(&b.y))
        .then_with(|| a.x.total_cmp(&b.x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::format_date;

    const PAGE: PageDims = PageDims::US_LETTER;

    #[test]
    fn test_add_field_defaults() {
        let mut store = FieldStore::new();
        let sig = store.add_field(10.0, 20.0, 1, FieldType::Signature);
        let date = store.add_field(30.0, 40.0, 1, FieldType::Date);

        let sig = store.get(&sig).unwrap();
        assert_eq!((sig.width, sig.height), (180.0, 50.0));
        assert!(!sig.is_filled);

        let date = store.get(&date).unwrap();
        assert!(date.is_filled);
        assert_eq!(date.value.as_deref(), Some(format_date(field::today()).as_str()));
        assert_eq!(store.fields()[1].id, date.id);
    }

    #[test]
    fn test_move_field_never_leaves_page() {
        let mut store = FieldStore::new();
        let id = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        let attempts = [
            (-50.0, -50.0),
            (10_000.0, 10_000.0),
            (600.0, 10.0),
            (10.0, 780.0),
            (200.0, 300.0),
        ];
        for (x, y) in attempts {
            store.move_field(&id, x, y, 1, PAGE);
            let f = store.get(&id).unwrap();
            assert!(f.x >= 0.0 && f.y >= 0.0);
            assert!(f.x + f.width <= PAGE.width);
            assert!(f.y + f.height <= PAGE.height);
        }
        let f = store.get(&id).unwrap();
        assert_eq!((f.x, f.y), (200.0, 300.0));
    }

    #[test]
    fn test_move_field_reassigns_page() {
        let mut store = FieldStore::new();
        let id = store.add_field(0.0, 0.0, 1, FieldType::Initial);
        store.move_field(&id, 5.0, 5.0, 3, PAGE);
        assert_eq!(store.get(&id).unwrap().page, 3);
    }

    #[test]
    fn test_change_type_to_and_from_date() {
        let mut store = FieldStore::new();
        let id = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        store.fill_field(&id, "data:image/png;base64,AAAA");

        store.change_field_type(&id, FieldType::Date);
        let f = store.get(&id).unwrap();
        assert!(f.is_filled);
        assert_eq!(f.value.as_deref(), Some(format_date(field::today()).as_str()));
        assert_eq!((f.width, f.height), (150.0, 35.0));

        store.change_field_type(&id, FieldType::Initial);
        let f = store.get(&id).unwrap();
        assert!(!f.is_filled);
        assert!(f.value.is_none());
        assert_eq!((f.width, f.height), (120.0, 40.0));
    }

    #[test]
    fn test_missing_ids_are_noops() {
        let mut store = FieldStore::new();
        store.add_field(0.0, 0.0, 1, FieldType::Signature);
        let snapshot = store.fields().to_vec();
        store.move_field("nope", 1.0, 1.0, 1, PAGE);
        store.change_field_type("nope", FieldType::Date);
        store.fill_field("nope", "data:image/png;base64,AAAA");
        assert!(!store.delete_field("nope"));
        assert_eq!(store.fields(), snapshot.as_slice());
    }

    #[test]
    fn test_delete_field() {
        let mut store = FieldStore::new();
        let a = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        let b = store.add_field(0.0, 0.0, 1, FieldType::Initial);
        assert!(store.delete_field(&a));
        assert_eq!(store.len(), 1);
        assert_eq!(store.fields()[0].id, b);
    }

    #[test]
    fn test_natural_order_picks_page_two() {
        let mut store = FieldStore::new();
        let a = store.add_field(50.0, 100.0, 1, FieldType::Signature);
        let b = store.add_field(200.0, 50.0, 1, FieldType::Signature);
        let c = store.add_field(10.0, 10.0, 2, FieldType::Signature);
        store.fill_field(&a, "data:image/png;base64,AAAA");
        store.fill_field(&b, "data:image/png;base64,AAAA");

        let order: Vec<&str> = store.natural_order().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(order, vec![b.as_str(), a.as_str(), c.as_str()]);
        assert_eq!(store.next_unfilled().unwrap().id, c);
    }

    #[test]
    fn test_remaining_and_all_filled() {
        let mut store = FieldStore::new();
        assert!(!store.all_filled());
        let s = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        store.add_field(0.0, 100.0, 1, FieldType::Date);
        assert_eq!(store.remaining(FieldType::Signature), 1);
        assert_eq!(store.remaining(FieldType::Date), 0);
        store.fill_field(&s, "data:image/png;base64,AAAA");
        assert!(store.all_filled());
    }

    #[test]
    fn test_retain_pages() {
        let mut store = FieldStore::new();
        store.add_field(0.0, 0.0, 1, FieldType::Signature);
        store.add_field(0.0, 0.0, 4, FieldType::Signature);
        assert_eq!(store.retain_pages(2), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dedupe_ids_keeps_first() {
        let mut store = FieldStore::new();
        let mut a = SignatureField::new("dup".into(), FieldType::Signature, 1, 0.0, 0.0, field::today());
        a.x = 1.0;
        let mut b = a.clone();
        b.x = 2.0;
        let c = SignatureField::new("other".into(), FieldType::Initial, 1, 0.0, 0.0, field::today());
        store.replace_all(vec![a, b, c]);

        assert_eq!(store.dedupe_ids(), 1);
        assert_eq!(store.get("dup").unwrap().x, 1.0);
        let ids: HashSet<&str> = store.fields().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(store.dedupe_ids(), 0);
    }

    #[test]
    fn test_clamp_to_pages() {
        let mut store = FieldStore::new();
        let inside = store.add_field(10.0, 10.0, 1, FieldType::Signature);
        let off = store.add_field(-40.0, 5000.0, 1, FieldType::Initial);
        let nan = store.add_field(f64::NAN, 20.0, 2, FieldType::Date);
        let mut fields = store.fields().to_vec();
        fields[2].width = -3.0;
        store.replace_all(fields);

        let small = PageDims::new(300.0, 400.0);
        let changed = store.clamp_to_pages(|page| if page == 1 { PAGE } else { small });
        assert_eq!(changed, 2);

        let f = store.get(&inside).unwrap();
        assert_eq!((f.x, f.y), (10.0, 10.0));
        let f = store.get(&off).unwrap();
        assert_eq!((f.x, f.y), (0.0, PAGE.height - 40.0));
        let f = store.get(&nan).unwrap();
        assert_eq!((f.x, f.y, f.width), (0.0, 20.0, 150.0));
    }
}
