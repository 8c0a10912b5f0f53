//! First-volume extraction for reverse phase-encoding fieldmaps.
//!
//! The first volume of a 4D diffusion series is written out as a 3D `epi`
//! fieldmap, the remaining volumes as the new `dwi` series, and the b-value /
//! b-vector tables lose their first entry to match. Everything is validated
//! before the first file is written.
//!
//! Output layout (`<stem>` is the last component of the prefix):
//!
//! - `<prefix>/fmap/<stem>_dir-<new>_epi.nii.gz`
//! - `<prefix>/dwi/<stem>_dir-<orig>_dwi.nii.gz` (+ `.bval`, `.bvec`)

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array4, Axis, Ix4, s};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::domain::PhaseEncoding;
use crate::error::AppError;

pub mod gradients;

use gradients::{Bvecs, format_bvals, format_bvecs, read_bvals, read_bvecs};

/// Inputs of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub dwi: PathBuf,
    pub bval: PathBuf,
    pub bvec: PathBuf,
    pub out_prefix: PathBuf,
    pub dir_orig: PhaseEncoding,
    pub dir_new: PhaseEncoding,
}

/// Paths written by [`extract_first_volume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOutputs {
    pub fieldmap: PathBuf,
    pub dwi: PathBuf,
    pub bval: PathBuf,
    pub bvec: PathBuf,
}

impl ExtractOutputs {
    pub fn for_prefix(prefix: &Path, dir_orig: PhaseEncoding, dir_new: PhaseEncoding) -> Result<Self, AppError> {
        let stem = prefix
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::new(
                    2,
                    format!("Output prefix '{}' has no usable final component.", prefix.display()),
                )
            })?;
        let dwi_dir = prefix.join("dwi");
        let dwi_file = |ext: &str| dwi_dir.join(format!("{stem}_dir-{}_dwi.{ext}", dir_orig.label()));
        Ok(Self {
            fieldmap: prefix
                .join("fmap")
                .join(format!("{stem}_dir-{}_epi.nii.gz", dir_new.label())),
            dwi: dwi_file("nii.gz"),
            bval: dwi_file("bval"),
            bvec: dwi_file("bvec"),
        })
    }
}

/// Gradient tables trimmed to the remaining volumes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedGradients {
    pub bvals: Vec<f64>,
    pub bvecs: Bvecs,
}

/// Drop the first b-value and b-vector column, checking both against the
/// number of volumes left after the first one is removed.
pub fn trim_gradients(bvals: &[f64], bvecs: &Bvecs, n_volumes: usize) -> Result<TrimmedGradients, AppError> {
    let remaining = n_volumes.saturating_sub(1);
    let bvals: Vec<f64> = bvals.iter().skip(1).copied().collect();
    let bvecs = bvecs.without_first();

    if bvals.len() != remaining {
        return Err(AppError::new(
            3,
            format!(
                "Mismatch between number of volumes in DWI and bvals: {remaining} volumes remain, {} b-values remain.",
                bvals.len()
            ),
        ));
    }
    if bvecs.columns() != remaining {
        return Err(AppError::new(
            3,
            format!(
                "Mismatch between number of volumes in DWI and bvecs: {remaining} volumes remain, {} b-vectors remain.",
                bvecs.columns()
            ),
        ));
    }
    Ok(TrimmedGradients { bvals, bvecs })
}

fn load_series(path: &Path) -> Result<(NiftiHeader, Array4<f32>), AppError> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| AppError::new(2, format!("Failed to read NIfTI '{}': {e}", path.display())))?;
    let header = obj.header().clone();
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| AppError::new(2, format!("Failed to decode '{}': {e}", path.display())))?;
    let ndim = data.ndim();
    let data = data.into_dimensionality::<Ix4>().map_err(|_| {
        AppError::new(
            2,
            format!("'{}' must be a 4D image, found {ndim} dimensions.", path.display()),
        )
    })?;
    Ok((header, data))
}

fn write_text(path: &Path, text: &str) -> Result<(), AppError> {
    fs::write(path, text)
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))
}

/// Split the first volume off `req.dwi` and write the trimmed series and tables.
pub fn extract_first_volume(req: &ExtractRequest) -> Result<ExtractOutputs, AppError> {
    let outputs = ExtractOutputs::for_prefix(&req.out_prefix, req.dir_orig, req.dir_new)?;

    let bvals = read_bvals(&req.bval)?;
    let bvecs = read_bvecs(&req.bvec)?;
    let (mut header, data) = load_series(&req.dwi)?;

    let n_volumes = data.len_of(Axis(3));
    if n_volumes < 2 {
        return Err(AppError::new(
            2,
            format!("'{}' has {n_volumes} volume(s); at least 2 are needed.", req.dwi.display()),
        ));
    }
    let gradients = trim_gradients(&bvals, &bvecs, n_volumes)?;
    log::info!(
        "{}: {n_volumes} volumes, keeping {} after the fieldmap",
        req.dwi.display(),
        n_volumes - 1
    );

    // Values were already scaled on read.
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;

    let first = data.index_axis(Axis(3), 0).to_owned();
    let rest = data.slice(s![.., .., .., 1..]).to_owned();

    for dir in [req.out_prefix.join("fmap"), req.out_prefix.join("dwi")] {
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", dir.display())))?;
    }

    WriterOptions::new(&outputs.fieldmap)
        .reference_header(&header)
        .write_nifti(&first)
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", outputs.fieldmap.display())))?;
    WriterOptions::new(&outputs.dwi)
        .reference_header(&header)
        .write_nifti(&rest)
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", outputs.dwi.display())))?;
    write_text(&outputs.bval, &format_bvals(&gradients.bvals))?;
    write_text(&outputs.bvec, &format_bvecs(&gradients.bvecs))?;

    log::info!("Wrote {} and {}", outputs.fieldmap.display(), outputs.dwi.display());
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_series(dir: &Path, n_volumes: usize) -> PathBuf {
        let path = dir.join("dwi.nii.gz");
        let data = Array4::<f32>::from_shape_fn((2, 3, 2, n_volumes), |(x, y, z, t)| {
            (t * 100 + x * 10 + y * 2 + z) as f32
        });
        WriterOptions::new(&path).write_nifti(&data).unwrap();
        path
    }

    fn request(dir: &Path, dwi: PathBuf, bvals: &str, bvecs: &str) -> ExtractRequest {
        let bval = dir.join("dwi.bval");
        let bvec = dir.join("dwi.bvec");
        fs::write(&bval, bvals).unwrap();
        fs::write(&bvec, bvecs).unwrap();
        ExtractRequest {
            dwi,
            bval,
            bvec,
            out_prefix: dir.join("sub-01"),
            dir_orig: PhaseEncoding::AP,
            dir_new: PhaseEncoding::PA,
        }
    }

    #[test]
    fn output_names_use_the_prefix_stem() {
        let out = ExtractOutputs::for_prefix(Path::new("data/sub-01"), PhaseEncoding::AP, PhaseEncoding::PA).unwrap();
        assert_eq!(out.fieldmap, Path::new("data/sub-01/fmap/sub-01_dir-PA_epi.nii.gz"));
        assert_eq!(out.dwi, Path::new("data/sub-01/dwi/sub-01_dir-AP_dwi.nii.gz"));
        assert_eq!(out.bval, Path::new("data/sub-01/dwi/sub-01_dir-AP_dwi.bval"));
        assert_eq!(out.bvec, Path::new("data/sub-01/dwi/sub-01_dir-AP_dwi.bvec"));
    }

    #[test]
    fn splits_first_volume_and_trims_tables() {
        let dir = tempfile::tempdir().unwrap();
        let dwi = write_series(dir.path(), 4);
        let req = request(
            dir.path(),
            dwi,
            "0 1000 1000 2000\n",
            "0 1 0 0\n0 0 1 0\n0 0 0 1\n",
        );

        let out = extract_first_volume(&req).unwrap();

        let fmap = ReaderOptions::new()
            .read_file(&out.fieldmap)
            .unwrap()
            .into_volume()
            .into_ndarray::<f32>()
            .unwrap();
        assert_eq!(fmap.shape(), &[2, 3, 2]);
        assert_eq!(fmap[[1, 2, 1]], 15.0);

        let series = ReaderOptions::new()
            .read_file(&out.dwi)
            .unwrap()
            .into_volume()
            .into_ndarray::<f32>()
            .unwrap();
        assert_eq!(series.shape(), &[2, 3, 2, 3]);
        assert_eq!(series[[0, 0, 0, 0]], 100.0);

        assert_eq!(
            fs::read_to_string(&out.bval).unwrap(),
            "1000.000000\n1000.000000\n2000.000000\n"
        );
        assert_eq!(
            fs::read_to_string(&out.bvec).unwrap().lines().next(),
            Some("1.000000 0.000000 0.000000")
        );
    }

    #[test]
    fn count_mismatch_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let dwi = write_series(dir.path(), 3);
        let req = request(dir.path(), dwi, "0 1000 1000 2000\n", "0 1 0\n0 0 1\n0 0 0\n");

        let err = extract_first_volume(&req).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("bvals"));
        assert!(!req.out_prefix.exists());
    }

    #[test]
    fn bvec_count_mismatch_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let dwi = write_series(dir.path(), 4);
        let req = request(dir.path(), dwi, "0 1000 1000 2000\n", "0 1 0\n0 0 1\n0 0 0\n");

        let err = extract_first_volume(&req).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("bvecs"));
        assert!(!req.out_prefix.exists());
    }

    #[test]
    fn single_volume_series_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dwi = write_series(dir.path(), 1);
        let req = request(dir.path(), dwi, "0\n", "0\n0\n0\n");
        let err = extract_first_volume(&req).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
