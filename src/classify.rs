//! File classification by extension with a MIME fallback.
//!
//! Classification never blocks a file: anything unrecognized, unreadable,
//! or ambiguous lands in [`Category::Uncategorized`].

use std::path::Path;

use tracing::debug;

/// Destination bucket for an organized file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Documents,
    Spreadsheets,
    Presentations,
    Images,
    Audio,
    Video,
    Archives,
    Code,
    Executables,
    Uncategorized,
}

impl Category {
    /// Directory name under the destination root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Documents => "documents",
            Category::Spreadsheets => "spreadsheets",
            Category::Presentations => "presentations",
            Category::Images => "images",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Archives => "archives",
            Category::Code => "code",
            Category::Executables => "executables",
            Category::Uncategorized => "uncategorized",
        }
    }

    pub fn is_archive(self) -> bool {
        self == Category::Archives
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

pub trait Classify: Send + Sync {
    fn classify(&self, path: &Path) -> Category;
}

/// Extension-table classifier with a `mime_guess` fallback.
#[derive(Debug, Default, Clone)]
pub struct ExtensionClassifier;

impl Classify for ExtensionClassifier {
    fn classify(&self, path: &Path) -> Category {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        // Compound archive extensions would otherwise classify by their
        // outermost suffix alone.
        for compound in [".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz2"] {
            if name.ends_with(compound) {
                return Category::Archives;
            }
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        if let Some(category) = extension.as_deref().and_then(category_for_extension) {
            debug!(path = %path.display(), %category, "classified by extension");
            return category;
        }

        if let Some(mime) = mime_guess::from_path(path).first() {
            if let Some(category) = category_for_mime(&mime) {
                debug!(path = %path.display(), %category, mime = %mime, "classified by MIME type");
                return category;
            }
        }

        debug!(path = %path.display(), "no classification rule matched");
        Category::Uncategorized
    }
}

fn category_for_extension(ext: &str) -> Option<Category> {
    let category = match ext {
        "pdf" | "doc" | "docx" | "txt" | "rtf" | "odt" | "md" | "pages" => Category::Documents,
        "xls" | "xlsx" | "csv" | "ods" | "numbers" => Category::Spreadsheets,
        "ppt" | "pptx" | "odp" | "key" => Category::Presentations,
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tiff" | "tif" | "svg" | "webp" | "ico"
        | "heic" | "raw" => Category::Images,
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "wma" | "m4a" => Category::Audio,
        "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" | "m4v" | "3gp" => Category::Video,
        "zip" | "jar" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => Category::Archives,
        "exe" | "msi" | "dmg" | "pkg" | "deb" | "rpm" | "appimage" => Category::Executables,
        "py" | "js" | "ts" | "html" | "css" | "java" | "cpp" | "c" | "h" | "php" | "rb"
        | "go" | "rs" | "swift" | "kt" | "json" | "xml" | "yaml" | "yml" | "toml" | "sh" => {
            Category::Code
        }
        _ => return None,
    };
    Some(category)
}

fn category_for_mime(mime: &mime_guess::Mime) -> Option<Category> {
    match mime.essence_str() {
        "application/pdf" | "application/msword" | "application/rtf" | "text/plain" => {
            return Some(Category::Documents)
        }
        "application/zip" | "application/gzip" | "application/x-tar"
        | "application/x-bzip2" | "application/x-7z-compressed"
        | "application/x-rar-compressed" => return Some(Category::Archives),
        "application/x-msdownload" | "application/x-msi"
        | "application/vnd.debian.binary-package" => return Some(Category::Executables),
        "application/json" | "application/javascript" | "text/html" | "text/css"
        | "application/xml" | "text/xml" => return Some(Category::Code),
        "text/csv" => return Some(Category::Spreadsheets),
        _ => {}
    }
    match mime.type_().as_str() {
        "image" => Some(Category::Images),
        "audio" => Some(Category::Audio),
        "video" => Some(Category::Video),
        _ => None,
    }
}
