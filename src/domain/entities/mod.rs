//! Domain entity definitions.

mod bitmap;
mod cache_key;
mod network_info;
mod policy;
mod request;
mod tag;

pub use bitmap::{Bitmap, LoadedFrom};
pub use cache_key::{KEY_SEPARATOR, create_key, locator_identity};
pub use network_info::{ConnectionType, MobileSubtype, NetworkInfo};
pub use policy::{MemoryPolicy, NetworkPolicy};
pub use request::{BitmapConfig, CropGravity, ImageLocator, Priority, Request, RequestBuilder};
pub use tag::Tag;
