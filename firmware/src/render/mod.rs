//! Rendering support for the display activity: palettes, thermal
//! false-colour and JPEG decode.

pub mod jpeg;
pub mod palettes;
pub mod thermal;
