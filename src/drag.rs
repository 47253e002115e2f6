use crate::geometry::{PageView, Point};
use crate::store::FieldStore;

/// An in-progress drag of one field. Dragging starts immediately on
/// pointer-down over the field body and holds the pointer until release or
/// cancel; every move is clamped to the page.
#[derive(Debug, Clone)]
pub struct FieldDrag {
    pub field_id: String,
    page: usize,
    view: PageView,
    /// Pointer position relative to the field's top-left corner, native points.
    grab_offset: Point,
}

impl FieldDrag {
    /// Start dragging `field_id` if the pointer landed on the field body.
    /// Presses on the field's controls (type selector, delete button) never
    /// start a drag.
    pub fn begin(
        store: &FieldStore,
        field_id: &str,
        pointer: Point,
        view: PageView,
        on_control: bool,
    ) -> Option<Self> {
        if on_control {
            return None;
        }
        let field = store.get(field_id)?;
        let native = view.to_native(pointer);
        Some(Self {
            field_id: field.id.clone(),
            page: field.page,
            view,
            grab_offset: Point::new(native.x - field.x, native.y - field.y),
        })
    }

    /// Apply a pointer move (rendered pixels, relative to the page surface).
    pub fn update(&self, store: &mut FieldStore, pointer: Point) {
        let native = self.view.to_native(pointer);
        store.move_field(
            &self.field_id,
            native.x - self.grab_offset.x,
            native.y - self.grab_offset.y,
            self.page,
            self.view.original,
        );
    }

    /// The surface changed size mid-drag (zoom, resize).
    pub fn set_view(&mut self, view: PageView) {
        self.view = view;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::geometry::PageDims;

    fn view() -> PageView {
        PageView::at_zoom(PageDims::US_LETTER, 1.5)
    }

    #[test]
    fn test_drag_preserves_grab_offset() {
        let mut store = FieldStore::new();
        let id = store.add_field(100.0, 100.0, 1, FieldType::Signature);
        // Grab 10pt into the field, at zoom 1.5.
        let drag = FieldDrag::begin(&store, &id, Point::new(165.0, 165.0), view(), false).unwrap();
        drag.update(&mut store, Point::new(315.0, 465.0));
        let f = store.get(&id).unwrap();
        assert!((f.x - 200.0).abs() < 1e-9);
        assert!((f.y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_drag_clamps_every_event() {
        let mut store = FieldStore::new();
        let id = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        let drag = FieldDrag::begin(&store, &id, Point::new(1.0, 1.0), view(), false).unwrap();
        for p in [
            Point::new(-500.0, -500.0),
            Point::new(5000.0, 20.0),
            Point::new(30.0, 5000.0),
        ] {
            drag.update(&mut store, p);
            let f = store.get(&id).unwrap();
            assert!(f.x >= 0.0 && f.y >= 0.0);
            assert!(f.x + f.width <= 612.0 && f.y + f.height <= 792.0);
        }
    }

    #[test]
    fn test_controls_do_not_start_drag() {
        let mut store = FieldStore::new();
        let id = store.add_field(0.0, 0.0, 1, FieldType::Signature);
        assert!(FieldDrag::begin(&store, &id, Point::new(1.0, 1.0), view(), true).is_none());
        assert!(FieldDrag::begin(&store, "missing", Point::new(1.0, 1.0), view(), false).is_none());
    }
}
