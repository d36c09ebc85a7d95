/// Analysis modules — statistics derived from a scanned tree.

pub mod duplicates;
pub mod extensions;

pub use duplicates::{find_duplicates, DuplicateGroup};
pub use extensions::{ExtensionIndex, ExtensionRecord, Rgb, BASE_BRIGHTNESS};
