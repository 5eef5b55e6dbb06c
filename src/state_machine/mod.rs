mod item;
mod state;

pub use item::{Item, ItemId, Upload, content_type_for, default_label, image_type_for_upload};
pub use state::{ItemState, ProcessingOutcome, StateMachine, Transition};
