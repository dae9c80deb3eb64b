//! Scenario directory collection
//!
//! A scenario directory is any directory holding SIPp `*.xml` scripts. Each
//! script becomes one agent: `uac` scripts are clients, `uas` scripts are
//! servers.

use std::path::{Path, PathBuf};

use crate::agent::{client, server, Settings, UserAgent};
use crate::common::{Error, Result};

/// A directory of SIPp scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenDir {
    pub path: PathBuf,
    pub xmls: Vec<PathBuf>,
}

/// Scripts directly inside `dir`, sorted by file name
pub fn glob_for_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut xmls = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_xml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if is_xml && path.is_file() {
            xmls.push(path);
        }
    }
    xmls.sort();
    Ok(xmls)
}

/// Every scenario directory under `root`, parents before children
pub fn iter_scen_dirs(root: &Path) -> Result<Vec<ScenDir>> {
    let root = root.canonicalize().map_err(|e| Error::FileRead {
        path: root.display().to_string(),
        error: e.to_string(),
    })?;
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut found = Vec::new();
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        let xmls = glob_for_scripts(&dir)?;
        if xmls.is_empty() {
            tracing::debug!("No SIPp xml scripts found under '{}'", dir.display());
        } else {
            found.push(ScenDir {
                path: dir.clone(),
                xmls,
            });
        }

        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        children.sort();
        // reversed so the stack pops them in sorted order
        pending.extend(children.into_iter().rev());
    }
    Ok(found)
}

/// Agents for a directory's scripts; servers go first
pub fn agents_for_scripts(xmls: &[PathBuf]) -> Result<Vec<UserAgent>> {
    let mut agents = Vec::with_capacity(xmls.len());
    for xml in xmls {
        let name = xml
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mut settings = Settings::new();
        settings.set("scen_file", xml.as_path())?;

        if name.contains("uac") {
            agents.push(client(settings)?);
        } else if name.contains("uas") {
            agents.insert(0, server(settings)?);
        } else {
            return Err(Error::Config(format!(
                "xml script must contain one of 'uac' or 'uas':\n{}",
                xml.display()
            )));
        }
    }
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, "<scenario/>").unwrap();
    }

    #[test]
    fn test_collects_script_dirs_in_order() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a_call");
        let b = root.path().join("b_call");
        let empty = root.path().join("empty");
        for dir in [&a, &b, &empty] {
            std::fs::create_dir(dir).unwrap();
        }
        touch(&a.join("uac.xml"));
        touch(&a.join("uas.xml"));
        touch(&b.join("uac.xml"));
        std::fs::write(b.join("notes.txt"), "").unwrap();

        let dirs = iter_scen_dirs(root.path()).unwrap();
        let paths: Vec<_> = dirs.iter().map(|d| d.path.file_name().unwrap()).collect();
        assert_eq!(paths, ["a_call", "b_call"]);
        assert_eq!(dirs[0].xmls.len(), 2);
        assert_eq!(dirs[1].xmls.len(), 1);
    }

    #[test]
    fn test_servers_first() {
        let dir = tempfile::tempdir().unwrap();
        let uac = dir.path().join("uac_invite.xml");
        let uas = dir.path().join("uas_invite.xml");
        touch(&uac);
        touch(&uas);

        let agents = agents_for_scripts(&glob_for_scripts(dir.path()).unwrap()).unwrap();
        assert_eq!(agents[0].name(), "uas_invite");
        assert_eq!(agents[1].name(), "uac_invite");
        assert!(agents[0].is_server());
    }

    #[test]
    fn test_rejects_unclassifiable_script() {
        let dir = tempfile::tempdir().unwrap();
        let odd = dir.path().join("register.xml");
        touch(&odd);
        assert!(matches!(
            agents_for_scripts(&[odd]),
            Err(Error::Config(_))
        ));
    }
}
