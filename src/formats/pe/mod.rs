//! PE image support for in-place patching
//!
//! Header fields are read and written at their documented offsets with
//! explicit bounds checks; nothing here overlays structs onto file bytes.

pub mod certificates;
pub mod headers;
pub mod types;
pub mod utils;

pub use certificates::CertificateTable;
pub use headers::PeImage;
pub use types::*;
pub use utils::{ReadExt, WriteExt};
