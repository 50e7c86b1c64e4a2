use std::collections::BTreeSet;
use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use crate::component::{ComponentType, Descriptor, MAX_TOC_SIZE};
use crate::error::Error;

#[test]
fn filename_round_trips() -> Result<()> {
    let d = Descriptor::new("/var/lib/tables", 42);
    let path = d.filename(ComponentType::Statistics);
    assert_eq!(path.to_str(), Some("/var/lib/tables/la-42-big-Statistics.db"));

    let (back, component) = Descriptor::from_filename(&path)?;
    assert_eq!(back, d);
    assert_eq!(component, ComponentType::Statistics);
    Ok(())
}

#[test]
fn unknown_names_are_malformed() {
    for name in [
        "la-1-big-Bogus.db",
        "zz-1-big-Data.db",
        "la-x-big-Data.db",
        "la-1-small-Data.db",
        "Data.db",
    ] {
        let err = Descriptor::from_filename(std::path::Path::new(name)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{name}: {err}");
    }
}

#[test]
fn toc_round_trips() -> Result<()> {
    let dir = tempdir()?;
    let d = Descriptor::new(dir.path(), 1);
    let components: BTreeSet<_> = [ComponentType::Data, ComponentType::TOC, ComponentType::Index]
        .into_iter()
        .collect();
    d.write_toc(&components)?;
    assert_eq!(d.read_toc()?, components);
    Ok(())
}

#[test]
fn missing_toc_is_malformed() -> Result<()> {
    let dir = tempdir()?;
    let err = Descriptor::new(dir.path(), 1).read_toc().unwrap_err();
    assert!(matches!(err, Error::Malformed { ref reason, .. } if reason == "file not found"), "{err}");
    Ok(())
}

#[test]
fn empty_toc_is_malformed() -> Result<()> {
    let dir = tempdir()?;
    let d = Descriptor::new(dir.path(), 1);
    fs::write(d.filename(ComponentType::TOC), "\n\n")?;
    let err = d.read_toc().unwrap_err();
    assert!(matches!(err, Error::Malformed { ref reason, .. } if reason == "empty TOC"), "{err}");
    Ok(())
}

#[test]
fn oversized_toc_is_malformed() -> Result<()> {
    let dir = tempdir()?;
    let d = Descriptor::new(dir.path(), 1);
    let line = "Data.db\n";
    let body = line.repeat(MAX_TOC_SIZE as usize / line.len() + 1);
    fs::write(d.filename(ComponentType::TOC), body)?;
    let err = d.read_toc().unwrap_err();
    assert!(matches!(err, Error::Malformed { ref reason, .. } if reason.starts_with("TOC too big")), "{err}");
    Ok(())
}

#[test]
fn unrecognized_toc_entry_is_malformed() -> Result<()> {
    let dir = tempdir()?;
    let d = Descriptor::new(dir.path(), 1);
    fs::write(d.filename(ComponentType::TOC), "Data.db\nIndex.db\nSecondary.db\n")?;
    assert!(matches!(d.read_toc(), Err(Error::Malformed { .. })));
    Ok(())
}

#[test]
fn create_new_refuses_existing_files() -> Result<()> {
    let dir = tempdir()?;
    let d = Descriptor::new(dir.path(), 3);
    d.create_new(ComponentType::Data)?;
    let err = d.create_new(ComponentType::Data).unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists), "{err}");
    Ok(())
}
