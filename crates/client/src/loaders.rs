use crate::entities::ImageReference;
use crate::errors::{ClientError, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// One loaded image: a base64 payload ready to be placed into a request plus
/// the scaling factor applied while loading.
///
/// The factor is the ratio between the resized and the original dimension;
/// `None` means the image was sent untouched and no correction is needed.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub payload: String,
    pub scaling_factor: Option<f64>,
}

/// Load a list of image references, downsizing each to fit into the requested
/// maximum dimensions (downscale only, aspect ratio preserved).
pub fn load_static_inference_input(
    references: Vec<ImageReference>,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<Vec<EncodedImage>> {
    references
        .into_iter()
        .map(|reference| load_image_reference(reference, max_height, max_width))
        .collect()
}

/// Async counterpart of [`load_static_inference_input`].
///
/// IO goes through tokio, the CPU-bound decode/resize/encode step runs on the
/// blocking pool. Output order matches input order.
pub async fn load_static_inference_input_async(
    http: &reqwest::Client,
    references: Vec<ImageReference>,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<Vec<EncodedImage>> {
    let loads = references
        .into_iter()
        .map(|reference| load_image_reference_async(http, reference, max_height, max_width));
    futures::future::try_join_all(loads).await
}

/// List image files in a directory matching the recognized extensions,
/// in lexicographic order.
pub fn scan_directory_for_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_image_reference(
    reference: ImageReference,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<EncodedImage> {
    match reference {
        ImageReference::Path(path) => {
            let bytes = std::fs::read(&path)?;
            encode_image_bytes(&bytes, max_height, max_width)
        }
        ImageReference::Url(url) => {
            let bytes = fetch_image_bytes(&url)?;
            encode_image_bytes(&bytes, max_height, max_width)
        }
        ImageReference::Base64(payload) => {
            if max_height.is_none() && max_width.is_none() {
                return Ok(EncodedImage {
                    payload,
                    scaling_factor: None,
                });
            }
            let bytes = STANDARD.decode(payload.as_bytes())?;
            encode_image_bytes(&bytes, max_height, max_width)
        }
        ImageReference::EncodedBytes(bytes) => encode_image_bytes(&bytes, max_height, max_width),
        ImageReference::Image(image) => encode_decoded_image(image, max_height, max_width),
    }
}

enum FetchedReference {
    Bytes(Vec<u8>),
    Base64(String),
    Image(DynamicImage),
}

async fn load_image_reference_async(
    http: &reqwest::Client,
    reference: ImageReference,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<EncodedImage> {
    let fetched = match reference {
        ImageReference::Path(path) => FetchedReference::Bytes(tokio::fs::read(&path).await?),
        ImageReference::Url(url) => {
            let response = http.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(ClientError::ImageLoading(format!(
                    "could not fetch image from {url}, status {}",
                    response.status()
                )));
            }
            FetchedReference::Bytes(response.bytes().await?.to_vec())
        }
        ImageReference::Base64(payload) => {
            if max_height.is_none() && max_width.is_none() {
                return Ok(EncodedImage {
                    payload,
                    scaling_factor: None,
                });
            }
            FetchedReference::Base64(payload)
        }
        ImageReference::EncodedBytes(bytes) => FetchedReference::Bytes(bytes),
        ImageReference::Image(image) => FetchedReference::Image(image),
    };
    tokio::task::spawn_blocking(move || match fetched {
        FetchedReference::Bytes(bytes) => encode_image_bytes(&bytes, max_height, max_width),
        FetchedReference::Base64(payload) => {
            let bytes = STANDARD.decode(payload.as_bytes())?;
            encode_image_bytes(&bytes, max_height, max_width)
        }
        FetchedReference::Image(image) => encode_decoded_image(image, max_height, max_width),
    })
    .await
    .map_err(|e| ClientError::ImageLoading(format!("image encoding task failed: {e}")))?
}

fn fetch_image_bytes(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::blocking::get(url)?;
    if !response.status().is_success() {
        return Err(ClientError::ImageLoading(format!(
            "could not fetch image from {url}, status {}",
            response.status()
        )));
    }
    Ok(response.bytes()?.to_vec())
}

fn encode_image_bytes(
    bytes: &[u8],
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<EncodedImage> {
    if max_height.is_none() && max_width.is_none() {
        // No resize requested: the encoded bytes travel as-is.
        return Ok(EncodedImage {
            payload: STANDARD.encode(bytes),
            scaling_factor: None,
        });
    }
    let image = image::load_from_memory(bytes)?;
    encode_decoded_image(image, max_height, max_width)
}

fn encode_decoded_image(
    image: DynamicImage,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> Result<EncodedImage> {
    let (image, scaling_factor) = downscale_image(image, max_height, max_width);
    let payload = encode_to_jpeg_base64(&image)?;
    Ok(EncodedImage {
        payload,
        scaling_factor,
    })
}

fn downscale_image(
    image: DynamicImage,
    max_height: Option<u32>,
    max_width: Option<u32>,
) -> (DynamicImage, Option<f64>) {
    let (width, height) = (image.width(), image.height());
    let mut scale = 1.0_f64;
    if let Some(max_width) = max_width {
        scale = scale.min(max_width as f64 / width as f64);
    }
    if let Some(max_height) = max_height {
        scale = scale.min(max_height as f64 / height as f64);
    }
    if scale >= 1.0 {
        return (image, None);
    }
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    let resized = image.resize_exact(new_width, new_height, FilterType::Triangle);
    (resized, Some(scale))
}

fn encode_to_jpeg_base64(image: &DynamicImage) -> Result<String> {
    // JPEG cannot carry an alpha channel, flatten to RGB first.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn solid_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([120, 40, 200])))
    }

    fn decode_payload(payload: &str) -> DynamicImage {
        let bytes = STANDARD.decode(payload.as_bytes()).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn test_downscale_records_scaling_factor() {
        let encoded =
            load_static_inference_input(vec![solid_image(128, 128).into()], Some(64), Some(64))
                .unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(
            encoded[0].scaling_factor,
            Some(0.5),
            "128px downsized to a 64px cap must record factor 0.5"
        );
        let decoded = decode_payload(&encoded[0].payload);
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_downscale_preserves_aspect_ratio() {
        let encoded =
            load_static_inference_input(vec![solid_image(200, 100).into()], Some(50), Some(50))
                .unwrap();
        assert_eq!(
            encoded[0].scaling_factor,
            Some(0.25),
            "The most constraining dimension drives the shared scale"
        );
        let decoded = decode_payload(&encoded[0].payload);
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn test_images_are_never_upscaled() {
        let encoded =
            load_static_inference_input(vec![solid_image(32, 32).into()], Some(64), Some(64))
                .unwrap();
        assert_eq!(
            encoded[0].scaling_factor, None,
            "An image already under the cap must not be touched"
        );
        let decoded = decode_payload(&encoded[0].payload);
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn test_encoded_bytes_pass_through_without_resize() {
        let mut buffer = Cursor::new(Vec::new());
        solid_image(16, 16)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        let bytes = buffer.into_inner();
        let encoded =
            load_static_inference_input(vec![bytes.clone().into()], None, None).unwrap();
        assert_eq!(
            encoded[0].payload,
            STANDARD.encode(&bytes),
            "Without a resize request the original bytes travel untouched"
        );
        assert_eq!(encoded[0].scaling_factor, None);
    }

    #[test]
    fn test_base64_reference_passes_through_without_resize() {
        let payload = "bm90LWEtcmVhbC1pbWFnZQ==".to_string();
        let encoded = load_static_inference_input(
            vec![ImageReference::Base64(payload.clone())],
            None,
            None,
        )
        .unwrap();
        assert_eq!(encoded[0].payload, payload);
        assert_eq!(encoded[0].scaling_factor, None);
    }

    #[test]
    fn test_directory_scan_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"stub").unwrap();
        }
        let extensions = vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()];
        let paths = scan_directory_for_images(dir.path(), &extensions).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["a.jpg", "b.PNG", "c.jpeg"],
            "Scan must match extensions case-insensitively and sort results"
        );
    }

    #[tokio::test]
    async fn test_async_loader_matches_sync_loader() {
        let http = reqwest::Client::new();
        let references = vec![solid_image(128, 64).into(), solid_image(32, 32).into()];
        let encoded = load_static_inference_input_async(&http, references, Some(64), Some(64))
            .await
            .unwrap();
        assert_eq!(encoded.len(), 2, "Output order and arity match the input");
        assert_eq!(encoded[0].scaling_factor, Some(0.5));
        assert_eq!(encoded[1].scaling_factor, None);
    }
}
