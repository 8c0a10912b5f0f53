//! Font lookup for figure text.
//!
//! Plotters is built without system font discovery, so the font file is
//! located here and its bytes handed to Plotters under a family key unique to
//! that file. A font that cannot be found is fatal, and is checked before any
//! fitting job starts.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use plotters::style::{FontStyle, register_font};

use crate::error::AppError;

const FONT_EXTENSIONS: [&str; 2] = ["ttf", "otf"];
const STYLE_WORDS: [&str; 6] = ["bold", "italic", "oblique", "light", "thin", "condensed"];

/// A loaded font file, ready to be registered with Plotters.
#[derive(Debug, Clone)]
pub struct FontSource {
    /// Family key the figure code uses for every text style.
    pub family: String,
    pub path: PathBuf,
    bytes: &'static [u8],
}

impl FontSource {
    /// Read a font file. The bytes live for the rest of the process, as
    /// Plotters' font registry requires.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let bytes = fs::read(path)
            .map_err(|e| AppError::new(4, format!("Failed to read font '{}': {e}", path.display())))?;
        Ok(Self {
            family: format!("gamlss-font:{}", path.display()),
            path: path.to_path_buf(),
            bytes: Box::leak(bytes.into_boxed_slice()),
        })
    }

    /// Make the font available to Plotters under [`family`](Self::family).
    pub fn register(&self) -> Result<(), AppError> {
        for style in [FontStyle::Normal, FontStyle::Bold] {
            register_font(&self.family, style, self.bytes).map_err(|_| {
                AppError::new(
                    4,
                    format!("Font '{}' could not be parsed.", self.path.display()),
                )
            })?;
        }
        Ok(())
    }
}

/// Platform font directories that exist on this machine.
pub fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/Library/Fonts",
        "/System/Library/Fonts",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();

    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join("Library/Fonts"));
    }
    if let Some(data) = env::var_os("XDG_DATA_HOME").map(PathBuf::from) {
        dirs.push(data.join("fonts"));
    }
    if let Some(windir) = env::var_os("WINDIR").map(PathBuf::from) {
        dirs.push(windir.join("Fonts"));
    }

    dirs.retain(|d| d.is_dir());
    dirs
}

/// Font files under `dirs` whose file name contains `name` (case and spaces ignored).
///
/// Regular faces sort before styled ones (bold, italic, ...), then shorter names first.
pub fn find_font_files(name: &str, dirs: &[PathBuf]) -> Vec<PathBuf> {
    let needle = squash(name);
    let mut found = Vec::new();
    let mut stack: Vec<PathBuf> = dirs.to_vec();
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| squash(n).contains(&needle));
            if is_font && matches {
                found.push(path);
            }
        }
    }

    found.sort_by_key(|p| {
        let file = p
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let styled = STYLE_WORDS.iter().any(|w| file.contains(w));
        (styled, file.len(), p.clone())
    });
    found
}

/// Resolve the figure font: an explicit file wins, otherwise search by name.
pub fn resolve_font(name: &str, explicit: Option<&Path>) -> Result<FontSource, AppError> {
    if let Some(path) = explicit {
        return FontSource::from_file(path);
    }

    let dirs = system_font_dirs();
    let Some(path) = find_font_files(name, &dirs).into_iter().next() else {
        return Err(AppError::new(
            4,
            format!(
                "Font {name} not found in system fonts (searched {}). \
                 Install it or pass --font-file.",
                dirs.iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    };
    log::info!("Using font {}", path.display());
    FontSource::from_file(&path)
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_prefers_regular_faces_and_ignores_case_and_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("truetype/harding");
        fs::create_dir_all(&nested).unwrap();
        for name in [
            "HardingText-Bold.ttf",
            "HardingText-Regular.ttf",
            "HardingText-Regular.woff2",
            "Other.ttf",
        ] {
            fs::write(nested.join(name), b"").unwrap();
        }

        let found = find_font_files("Harding Text", &[dir.path().to_path_buf()]);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["HardingText-Regular.ttf", "HardingText-Bold.ttf"]);
    }

    #[test]
    fn unknown_font_is_an_environment_error() {
        let err = resolve_font("NoSuchFontFamily-7c1e", None).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("NoSuchFontFamily-7c1e"));
    }

    #[test]
    fn corrupt_font_file_fails_to_register() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"not a font at all").unwrap();

        let font = FontSource::from_file(&path).unwrap();
        let err = font.register().unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("broken.ttf"));
    }

    #[test]
    fn bundled_fixture_font_registers() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSansMono.ttf");
        let font = FontSource::from_file(&path).unwrap();
        font.register().unwrap();
        assert!(font.family.starts_with("gamlss-font:"));
    }

    #[test]
    fn unreadable_explicit_font_file_is_an_error() {
        let err = resolve_font("ignored", Some(Path::new("/nonexistent/font.ttf"))).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
