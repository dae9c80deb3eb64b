//! Failure reporting for agent runs

use std::fmt::Write as _;
use std::path::Path;

use indexmap::IndexMap;

use crate::agent::UserAgent;
use crate::launch::ProcResult;

/// Known SIPp exit codes and their meaning
pub const EXITCODES: &[(i32, &str)] = &[
    (0, "All calls were successful"),
    (1, "At least one call failed"),
    (15, "Process was terminated"),
    (97, "Exit on internal command. Calls may have been processed"),
    (99, "Normal exit without calls processed"),
    (-1, "Fatal error"),
    (-2, "Fatal error binding a socket"),
    (-10, "Signalled to stop with SIGUSR1"),
    (254, "Connection Error: socket already in use"),
    (255, "Command or syntax error: check stderr output"),
];

pub fn exit_code_description(rc: i32) -> &'static str {
    EXITCODES
        .iter()
        .find(|(code, _)| *code == rc)
        .map(|(_, text)| *text)
        .unwrap_or("unknown exit code")
}

/// Summary naming every agent's exit code, if any agent failed
///
/// Agents still running count as neither passed nor failed.
pub fn err_summary(agents2procs: &[(&UserAgent, &ProcResult)]) -> Option<String> {
    let name2ec: IndexMap<String, Option<i32>> = agents2procs
        .iter()
        .map(|(agent, proc)| (agent.name(), proc.returncode))
        .collect();

    if !name2ec.values().any(|rc| matches!(rc, Some(rc) if *rc != 0)) {
        return None;
    }

    let mut msg = String::from("Some agents failed");
    for (name, rc) in &name2ec {
        match rc {
            Some(rc) => {
                let _ = write!(
                    msg,
                    "\n'{}' with exit code {} -> {}",
                    name,
                    rc,
                    exit_code_description(*rc)
                );
            }
            None => {
                let _ = write!(msg, "\n'{}' is still running", name);
            }
        }
    }
    Some(msg)
}

/// Contents of a log file, cut to `max_lines` with a pointer to the rest
pub fn read_truncated(path: &Path, max_lines: usize) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = contents.lines().collect();
    if lines.len() <= max_lines {
        return Some(contents);
    }

    let mut output = lines[..max_lines].join("\n");
    let _ = write!(
        output,
        "\n...\nOutput has been truncated to {} lines - see '{}' for full details\n",
        max_lines,
        path.display()
    );
    Some(output)
}

/// Log each agent's stderr and console log files
pub fn emit_logfiles(agents2procs: &[(&UserAgent, &ProcResult)], max_lines: usize) {
    for (agent, proc) in agents2procs {
        let name = agent.name();
        let srcaddr = agent
            .srcaddr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());

        tracing::warn!("stderr for '{}' @ {}\n{}", name, srcaddr, proc.stderr);

        for (attr, file) in agent.toconsole_items() {
            let Some(file) = file else { continue };
            let path = Path::new(&file);
            if !path.is_file() {
                continue;
            }
            if let Some(output) = read_truncated(path, max_lines) {
                tracing::warn!("'{}' contents for '{}' @ {}:\n{}", attr, name, srcaddr, output);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{client, server, Settings};

    fn finished(rc: i32) -> ProcResult {
        ProcResult {
            pid: Some(1),
            returncode: Some(rc),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_summary_when_all_pass() {
        let uas = server(Settings::new()).unwrap();
        let ok = finished(0);
        assert!(err_summary(&[(&uas, &ok)]).is_none());
    }

    #[test]
    fn test_summary_lists_every_agent() {
        let uas = server(Settings::new()).unwrap();
        let uac = client(Settings::new()).unwrap();
        let (bound, killed) = (finished(255), finished(-10));

        let summary = err_summary(&[(&uas, &bound), (&uac, &killed)]).unwrap();
        assert_eq!(
            summary,
            "Some agents failed\n\
             'uas' with exit code 255 -> Command or syntax error: check stderr output\n\
             'uac' with exit code -10 -> Signalled to stop with SIGUSR1"
        );
    }

    #[test]
    fn test_unknown_exit_code() {
        assert_eq!(exit_code_description(42), "unknown exit code");
        assert_eq!(exit_code_description(99), "Normal exit without calls processed");
    }

    #[test]
    fn test_read_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uac_screen.log");
        let body: Vec<String> = (0..150).map(|i| format!("line {}", i)).collect();
        std::fs::write(&path, body.join("\n")).unwrap();

        let output = read_truncated(&path, 100).unwrap();
        assert!(output.contains("line 99\n...\nOutput has been truncated to 100 lines"));
        assert!(!output.contains("line 100\n"));

        let short = dir.path().join("short.log");
        std::fs::write(&short, "one\ntwo\n").unwrap();
        assert_eq!(read_truncated(&short, 100).unwrap(), "one\ntwo\n");
        assert!(read_truncated(&dir.path().join("missing"), 100).is_none());
    }
}
