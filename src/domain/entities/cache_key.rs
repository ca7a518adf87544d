//! Deterministic memory-cache keys.

use sha2::{Digest, Sha256};

use super::request::{ImageLocator, Request};

/// Terminates the identity segment and every transform segment of a key.
pub const KEY_SEPARATOR: char = '\n';

/// Returns the identity part of a key for a locator, without separator.
///
/// In-memory bytes are identified by a content hash so equal payloads share
/// cache entries.
#[must_use]
pub fn locator_identity(locator: &ImageLocator) -> String {
    match locator {
        ImageLocator::Uri(uri) => uri.as_str().to_string(),
        ImageLocator::Resource(id) => id.to_string(),
        ImageLocator::Bytes(bytes) => {
            let hash = Sha256::digest(bytes);
            format!("bytes:{}", hex::encode(&hash[..16]))
        }
    }
}

/// Escapes caller-supplied text so it can never contain a bare separator.
fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            KEY_SEPARATOR => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Builds the memory-cache key for a request.
///
/// The key starts with the stable key, URI or resource id, then appends a
/// separator-terminated segment for every transform parameter set.
#[must_use]
pub fn create_key(request: &Request) -> String {
    let mut key = request
        .stable_key()
        .map_or_else(|| locator_identity(request.locator()), escape_segment);
    key.push(KEY_SEPARATOR);

    if request.rotation_degrees() != 0.0 {
        key.push_str(&format!("rotation:{}", request.rotation_degrees()));
        if let Some((x, y)) = request.rotation_pivot() {
            key.push_str(&format!("@{x}x{y}"));
        }
        key.push(KEY_SEPARATOR);
    }
    if request.has_size() {
        key.push_str(&format!(
            "resize:{}x{}",
            request.target_width(),
            request.target_height()
        ));
        key.push(KEY_SEPARATOR);
    }
    if request.center_crop() {
        key.push_str(&format!("centerCrop:{}", request.center_crop_gravity()));
        key.push(KEY_SEPARATOR);
    } else if request.center_inside() {
        key.push_str("centerInside");
        key.push(KEY_SEPARATOR);
    }
    if request.only_scale_down() {
        key.push_str("onlyScaleDown");
        key.push(KEY_SEPARATOR);
    }
    if let Some(config) = request.config() {
        key.push_str(&format!("config:{config}"));
        key.push(KEY_SEPARATOR);
    }
    for transformation in request.transformations() {
        key.push_str(&escape_segment(&transformation.key()));
        key.push(KEY_SEPARATOR);
    }
    key
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use url::Url;

    use super::*;
    use crate::domain::entities::{Bitmap, BitmapConfig, CropGravity};
    use crate::domain::ports::Transformation;

    struct Named(&'static str);

    impl Transformation for Named {
        fn transform(&self, source: Bitmap) -> Bitmap {
            source
        }

        fn key(&self) -> String {
            self.0.to_string()
        }
    }

    fn uri_request() -> crate::domain::entities::RequestBuilder {
        Request::builder(ImageLocator::Uri(
            Url::parse("https://example.com/cat.png").unwrap(),
        ))
    }

    #[test]
    fn test_plain_uri_key() {
        let request = uri_request().build().unwrap();
        assert_eq!(create_key(&request), "https://example.com/cat.png\n");
    }

    #[test]
    fn test_stable_key_overrides_uri() {
        let request = uri_request().stable_key("cat").build().unwrap();
        assert_eq!(create_key(&request), "cat\n");
    }

    #[test]
    fn test_full_key_layout() {
        let request = uri_request()
            .rotate_about(90.0, 1.0, 2.0)
            .resize(100, 50)
            .unwrap()
            .center_crop(CropGravity::Top)
            .unwrap()
            .transform(Arc::new(Named("blur")))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            create_key(&request),
            "https://example.com/cat.png\nrotation:90@1x2\nresize:100x50\ncenterCrop:top\nblur\n"
        );
    }

    #[test]
    fn test_single_parameter_changes_key() {
        let base = uri_request().resize(10, 10).unwrap();
        let plain = create_key(&base.clone().build().unwrap());
        let inside = create_key(&base.clone().center_inside().unwrap().build().unwrap());
        let crop = create_key(
            &base
                .clone()
                .center_crop(CropGravity::Center)
                .unwrap()
                .build()
                .unwrap(),
        );
        let scaled = create_key(&base.clone().only_scale_down().unwrap().build().unwrap());
        let configured = create_key(&base.config(BitmapConfig::Luma8).build().unwrap());

        let keys = [plain, inside, crop, scaled, configured];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_separator_in_user_segments_cannot_forge_keys() {
        let joined = uri_request()
            .transform(Arc::new(Named("blur\ngray")))
            .unwrap()
            .build()
            .unwrap();
        let split = uri_request()
            .transform(Arc::new(Named("blur")))
            .unwrap()
            .transform(Arc::new(Named("gray")))
            .unwrap()
            .build()
            .unwrap();
        assert_ne!(create_key(&joined), create_key(&split));
        assert_eq!(
            create_key(&joined),
            "https://example.com/cat.png\nblur\\ngray\n"
        );

        let forged = uri_request()
            .stable_key("k\nresize:10x10")
            .build()
            .unwrap();
        let resized = uri_request()
            .stable_key("k")
            .resize(10, 10)
            .unwrap()
            .build()
            .unwrap();
        assert_ne!(create_key(&forged), create_key(&resized));

        let backslash = uri_request().stable_key("k\\n").build().unwrap();
        assert_ne!(create_key(&backslash), create_key(&forged));
    }

    #[test]
    fn test_resource_and_bytes_identity() {
        let request = Request::builder(ImageLocator::Resource(12)).build().unwrap();
        assert_eq!(create_key(&request), "12\n");

        let a = locator_identity(&ImageLocator::Bytes(Bytes::from_static(b"abc")));
        let b = locator_identity(&ImageLocator::Bytes(Bytes::from_static(b"abc")));
        let c = locator_identity(&ImageLocator::Bytes(Bytes::from_static(b"abd")));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("bytes:"));
        assert_eq!(a.len(), "bytes:".len() + 32);
    }
}
