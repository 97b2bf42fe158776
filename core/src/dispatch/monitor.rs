//! Monitor subcommands (spec §4.5, component C8): `qRcmd,<hex>`.

use crate::probe::{ProbeAdapter, ProbeTransport};

const HELP_TEXT: &str = "\
Monitor commands:\n\
  help, ?    show this help\n\
  version    show bridge version\n\
  reset      reset the target\n";

/// Runs one monitor command, returning the reply text to hex-encode into
/// the `qRcmd` response. `None` means "unsupported" (empty RSP reply).
pub fn run<T: ProbeTransport>(cmd: &str, probe: &mut ProbeAdapter<T>) -> Option<String> {
    match cmd.trim() {
        "help" | "?" => Some(HELP_TEXT.to_string()),
        "version" => Some(format!("avrbridge-gdbserver {}\n", env!("CARGO_PKG_VERSION"))),
        "reset" => Some(match probe.reset() {
            Ok(()) => "target reset\n".to_string(),
            Err(e) => format!("reset failed: {e}\n"),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::MockTransport;

    #[test]
    fn help_and_question_mark_are_aliases() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        assert_eq!(run("help", &mut probe), run("?", &mut probe));
    }

    #[test]
    fn unknown_command_is_none() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        assert!(run("frobnicate", &mut probe).is_none());
    }

    #[test]
    fn reset_reports_success() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let reply = run("reset", &mut probe).unwrap();
        assert!(reply.contains("reset"));
    }
}
