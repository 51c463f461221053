//! Value types shared by the codec, the files and the cursor engine.

pub mod field_value;
pub mod ids;

pub use field_value::FieldValue;
pub use ids::ObjectId;
