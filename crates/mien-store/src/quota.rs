//! Quota-enforced sample enrollment.
//!
//! Each identity holds at most `max_samples_per_identity` training
//! samples. Enrolling at the quota first evicts the single oldest
//! sample, so the gallery follows appearance drift instead of growing
//! without bound.

use crate::fsops::remove_quiet;
use crate::layout::Layout;
use crate::settings::Tunables;
use crate::store::{Identity, Store, StoreError};
use image::DynamicImage;
use mien_core::Embedding;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to create identity directories: {0}")]
    Dirs(std::io::Error),

    #[error("failed to write face crop: {0}")]
    CropWrite(image::ImageError),

    #[error("failed to copy original image: {0}")]
    OriginalCopy(std::io::Error),
}

/// Enroll one new training sample for `identity`.
///
/// The quota is re-read from settings on every call. Media is written
/// before the row: the crop first, then the original copy (removing the
/// crop if the copy fails), and the row only once both files exist.
/// Returns the new sample's id.
pub fn enroll(
    store: &Store,
    layout: &Layout,
    identity: &Identity,
    crop: &DynamicImage,
    embedding: &Embedding,
    original: &Path,
    stamp: &str,
) -> Result<i64, EnrollError> {
    let max = Tunables::load(store)?.max_samples;
    let count = store.sample_count(identity.id)? as usize;
    if count >= max {
        if let Some(oldest) = store.oldest_sample(identity.id)? {
            tracing::info!(
                identity = %identity.name,
                sample_id = oldest.id,
                quota = max,
                "sample quota reached; evicting oldest"
            );
            store.delete_sample(layout, oldest.id)?;
        }
    }

    let crops = layout.crops_dir(&identity.name);
    let originals = layout.originals_dir(&identity.name);
    fs::create_dir_all(&crops).map_err(EnrollError::Dirs)?;
    fs::create_dir_all(&originals).map_err(EnrollError::Dirs)?;

    let file_name = format!("{}_{stamp}.jpg", identity.name);
    let crop_path = crops.join(&file_name);
    let original_path = originals.join(&file_name);

    // JPEG output; RGBA sources must be flattened first.
    let flat = DynamicImage::ImageRgb8(crop.to_rgb8());
    flat.save(&crop_path).map_err(EnrollError::CropWrite)?;

    if let Err(e) = fs::copy(original, &original_path) {
        remove_quiet(&crop_path);
        return Err(EnrollError::OriginalCopy(e));
    }

    let sample_id = match store.add_sample(
        identity.id,
        &crop_path.to_string_lossy(),
        Some(&original_path.to_string_lossy()),
        embedding,
    ) {
        Ok(id) => id,
        Err(e) => {
            remove_quiet(&crop_path);
            remove_quiet(&original_path);
            return Err(e.into());
        }
    };

    tracing::info!(identity = %identity.name, sample_id, "enrolled training sample");
    Ok(sample_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings;
    use std::path::PathBuf;

    fn setup() -> (tempfile::TempDir, Layout, Store, Identity) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();
        let store = Store::open_in_memory().unwrap();
        let identity = store.create_identity("Ana", None).unwrap();
        (dir, layout, store, identity)
    }

    fn source_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"frame bytes").unwrap();
        path
    }

    fn crop() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 8, image::Rgb([120, 90, 60])))
    }

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_enroll_writes_both_files_and_row() {
        let (dir, layout, store, ana) = setup();
        let source = source_file(dir.path(), "s1.jpg");

        let id = enroll(&store, &layout, &ana, &crop(), &embedding(&[1.0, 0.0]), &source, "s1")
            .unwrap();

        let samples = store.samples_for(ana.id).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].id, id);
        assert!(Path::new(&samples[0].crop_path).exists());
        assert!(Path::new(samples[0].original_path.as_deref().unwrap()).exists());
        assert_eq!(samples[0].embedding, embedding(&[1.0, 0.0]));
    }

    #[test]
    fn test_quota_evicts_single_oldest() {
        let (dir, layout, store, ana) = setup();
        store
            .set_setting(settings::MAX_SAMPLES_PER_IDENTITY, "3")
            .unwrap();

        let mut ids = Vec::new();
        for i in 1..=4 {
            let source = source_file(dir.path(), &format!("s{i}.jpg"));
            let id = enroll(
                &store,
                &layout,
                &ana,
                &crop(),
                &embedding(&[i as f32]),
                &source,
                &format!("s{i}"),
            )
            .unwrap();
            ids.push(id);
        }

        let samples = store.samples_for(ana.id).unwrap();
        assert_eq!(samples.len(), 3);
        // First-in was evicted; the rest kept their order.
        let kept: Vec<i64> = samples.iter().map(|s| s.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
        // Evicted media is gone, surviving media still present.
        assert!(!layout.crops_dir("ana").join("ana_s1.jpg").exists());
        assert!(layout.crops_dir("ana").join("ana_s4.jpg").exists());
        assert!(layout.originals_dir("ana").join("ana_s4.jpg").exists());
    }

    #[test]
    fn test_quota_change_applies_to_next_enroll() {
        let (dir, layout, store, ana) = setup();
        store
            .set_setting(settings::MAX_SAMPLES_PER_IDENTITY, "2")
            .unwrap();
        for i in 1..=2 {
            let source = source_file(dir.path(), &format!("s{i}.jpg"));
            enroll(&store, &layout, &ana, &crop(), &embedding(&[1.0]), &source, &format!("s{i}"))
                .unwrap();
        }

        // Raising the quota lets the gallery grow again without eviction.
        store
            .set_setting(settings::MAX_SAMPLES_PER_IDENTITY, "5")
            .unwrap();
        let source = source_file(dir.path(), "s3.jpg");
        enroll(&store, &layout, &ana, &crop(), &embedding(&[1.0]), &source, "s3").unwrap();
        assert_eq!(store.sample_count(ana.id).unwrap(), 3);
    }

    #[test]
    fn test_failed_original_copy_rolls_back_crop() {
        let (dir, layout, store, ana) = setup();
        let missing = dir.path().join("never-existed.jpg");

        let result = enroll(&store, &layout, &ana, &crop(), &embedding(&[1.0]), &missing, "s1");
        assert!(matches!(result, Err(EnrollError::OriginalCopy(_))));
        assert_eq!(store.sample_count(ana.id).unwrap(), 0);
        assert!(!layout.crops_dir("ana").join("ana_s1.jpg").exists());
    }
}
