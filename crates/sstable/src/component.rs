//! Component files of a table and the TOC that lists them.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// TOC.txt is tiny; anything this large is not a TOC.
pub const MAX_TOC_SIZE: u64 = 4096;

pub const DEFAULT_VERSION: &str = "la";
pub const DEFAULT_FORMAT: &str = "big";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentType {
    Index,
    CompressionInfo,
    Data,
    TOC,
    Summary,
    Digest,
    CRC,
    Filter,
    Statistics,
}

impl ComponentType {
    pub const ALL: [ComponentType; 9] = [
        ComponentType::Index,
        ComponentType::CompressionInfo,
        ComponentType::Data,
        ComponentType::TOC,
        ComponentType::Summary,
        ComponentType::Digest,
        ComponentType::CRC,
        ComponentType::Filter,
        ComponentType::Statistics,
    ];

    /// Components every loadable table has.
    pub const REQUIRED: [ComponentType; 4] = [
        ComponentType::Data,
        ComponentType::Index,
        ComponentType::Statistics,
        ComponentType::Summary,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ComponentType::Index => "Index.db",
            ComponentType::CompressionInfo => "CompressionInfo.db",
            ComponentType::Data => "Data.db",
            ComponentType::TOC => "TOC.txt",
            ComponentType::Summary => "Summary.db",
            ComponentType::Digest => "Digest.sha1",
            ComponentType::CRC => "CRC.db",
            ComponentType::Filter => "Filter.db",
            ComponentType::Statistics => "Statistics.db",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.file_name() == name)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Names one table: every component file is
/// `<dir>/<version>-<generation>-<format>-<component>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub dir: PathBuf,
    pub version: String,
    pub generation: u64,
    pub format: String,
}

impl Descriptor {
    pub fn new(dir: impl Into<PathBuf>, generation: u64) -> Self {
        Self {
            dir: dir.into(),
            version: DEFAULT_VERSION.to_string(),
            generation,
            format: DEFAULT_FORMAT.to_string(),
        }
    }

    pub fn filename(&self, component: ComponentType) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}-{}",
            self.version,
            self.generation,
            self.format,
            component.file_name()
        ))
    }

    /// Reverse of [`filename`](Descriptor::filename).
    pub fn from_filename(path: &Path) -> Result<(Self, ComponentType)> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::malformed(path, "file name is not valid UTF-8"))?;
        let parts: Vec<&str> = name.splitn(4, '-').collect();
        let [version, generation, format, component] = parts[..] else {
            return Err(Error::malformed(path, "expected <version>-<generation>-<format>-<component>"));
        };
        if version != DEFAULT_VERSION {
            return Err(Error::malformed(path, format!("unknown version {version}")));
        }
        if format != DEFAULT_FORMAT {
            return Err(Error::malformed(path, format!("unknown format {format}")));
        }
        let generation = generation
            .parse()
            .map_err(|_| Error::malformed(path, format!("bad generation {generation}")))?;
        let component = ComponentType::from_file_name(component)
            .ok_or_else(|| Error::malformed(path, format!("unknown component {component}")))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok((
            Self {
                dir,
                version: version.to_string(),
                generation,
                format: format.to_string(),
            },
            component,
        ))
    }

    /// Opens a component for reading; a missing file is a malformed table.
    pub fn open(&self, component: ComponentType) -> Result<File> {
        let path = self.filename(component);
        File::open(&path).map_err(|e| not_found_as_malformed(e, &path))
    }

    /// Creates a component, failing if it already exists.
    pub fn create_new(&self, component: ComponentType) -> Result<File> {
        let path = self.filename(component);
        debug!(path = %path.display(), "creating {component}");
        Ok(OpenOptions::new().write(true).create_new(true).open(path)?)
    }

    /// Reads a whole component into memory.
    pub fn read_all(&self, component: ComponentType) -> Result<Vec<u8>> {
        let path = self.filename(component);
        debug!(path = %path.display(), "reading {component}");
        fs::read(&path).map_err(|e| not_found_as_malformed(e, &path))
    }

    /// Writes a small component in one go.
    pub fn write_all(&self, component: ComponentType, bytes: &[u8]) -> Result<()> {
        let path = self.filename(component);
        debug!(path = %path.display(), bytes = bytes.len(), "writing {component}");
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        Ok(())
    }

    /// Reads TOC.txt: one component name per line, blank lines ignored.
    pub fn read_toc(&self) -> Result<BTreeSet<ComponentType>> {
        let path = self.filename(ComponentType::TOC);
        debug!(path = %path.display(), "reading TOC");
        let f = File::open(&path).map_err(|e| not_found_as_malformed(e, &path))?;

        let mut buf = Vec::new();
        f.take(MAX_TOC_SIZE).read_to_end(&mut buf)?;
        if buf.len() as u64 >= MAX_TOC_SIZE {
            return Err(Error::malformed(&path, format!("TOC too big: {} bytes", buf.len())));
        }
        let text = String::from_utf8(buf).map_err(|_| Error::malformed(&path, "TOC is not UTF-8"))?;

        let mut components = BTreeSet::new();
        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let c = ComponentType::from_file_name(line)
                .ok_or_else(|| Error::malformed(&path, format!("unrecognized TOC component: {line}")))?;
            components.insert(c);
        }
        if components.is_empty() {
            return Err(Error::malformed(&path, "empty TOC"));
        }
        Ok(components)
    }

    pub fn write_toc(&self, components: &BTreeSet<ComponentType>) -> Result<()> {
        let mut text = String::new();
        for c in components {
            text.push_str(c.file_name());
            text.push('\n');
        }
        self.write_all(ComponentType::TOC, text.as_bytes())
    }
}

fn not_found_as_malformed(e: std::io::Error, path: &Path) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::malformed(path, "file not found")
    } else {
        Error::Io(e)
    }
}
