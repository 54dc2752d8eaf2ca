//! Console rendering for scheduler events and reports

use casper_queue::events::QueueEvent;
use casper_queue::report::format_secs;
use casper_queue::style::{render, render_bold, Style};
use tokio::sync::mpsc;

/// Turns [`QueueEvent`]s into console lines
#[derive(Debug, Clone, Copy)]
pub struct EventPrinter {
    /// Also show per-suite starts and per-test results
    pub verbose: bool,
}

impl EventPrinter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// The line(s) for `event`, or `None` when it is not shown
    pub fn format(&self, event: &QueueEvent) -> Option<String> {
        match event {
            QueueEvent::RoundStarted { round: 0, suites } => Some(render(
                &format!("Running {} test set(s)", suites.len()),
                Style::Info,
            )),
            QueueEvent::RoundStarted { round, suites } => Some(render_bold(
                &format!(
                    "Retrying failed test(s): retry #{} ({} test set(s))",
                    round,
                    suites.len()
                ),
                Style::Retry,
            )),
            QueueEvent::SuiteStarted {
                name,
                worker,
                tests,
                ..
            } if self.verbose => Some(render(
                &format!("▶ {} ({} test(s)) on worker {}", name, tests, worker),
                Style::Plain,
            )),
            QueueEvent::TestFinished {
                file,
                succeeded,
                duration,
                ..
            } if self.verbose => {
                let (mark, style) = if *succeeded {
                    ("✔", Style::Success)
                } else {
                    ("✘", Style::Failure)
                };
                Some(render(
                    &format!("  {} {} ({}s)", mark, file.display(), format_secs(*duration)),
                    style,
                ))
            }
            QueueEvent::SuiteFinished {
                name,
                round,
                elapsed,
                failed,
            } => {
                if failed.is_empty() {
                    Some(render(
                        &format!("✔ {} took {}s. Retry #{}", name, format_secs(*elapsed), round),
                        Style::Success,
                    ))
                } else {
                    let mut lines = vec![render(
                        &format!(
                            "✘ {} took {}s. Retry #{} - {} failed",
                            name,
                            format_secs(*elapsed),
                            round,
                            failed.len()
                        ),
                        Style::Failure,
                    )];
                    lines.extend(
                        failed
                            .iter()
                            .map(|file| render(&format!("  ✘ {}", file.display()), Style::Failure)),
                    );
                    Some(lines.join("\n"))
                }
            }
            QueueEvent::RoundDrained {
                round,
                failing_suites,
            } if *failing_suites > 0 => Some(render(
                &format!("{} test set(s) with failures after retry #{}", failing_suites, round),
                Style::Retry,
            )),
            _ => None,
        }
    }

    /// Print events until every sender is gone
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<QueueEvent>) {
        while let Some(event) = rx.recv().await {
            if let Some(line) = self.format(&event) {
                println!("{}", line);
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", render(message, Style::Success));
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", render(message, Style::Failure));
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("⚠️  {}", render(message, Style::Retry));
}

#[cfg(test)]
mod tests {
    use super::*;
    use casper_queue::style::set_color_enabled;
    use std::path::PathBuf;
    use std::time::Duration;

    fn plain(printer: EventPrinter, event: QueueEvent) -> Option<String> {
        set_color_enabled(false);
        printer.format(&event)
    }

    #[test]
    fn test_round_headers() {
        let printer = EventPrinter::new(false);
        let first = plain(
            printer,
            QueueEvent::RoundStarted {
                round: 0,
                suites: vec!["google".into(), "bing".into()],
            },
        );
        assert_eq!(first.as_deref(), Some("Running 2 test set(s)"));

        let retry = plain(
            printer,
            QueueEvent::RoundStarted {
                round: 1,
                suites: vec!["bing".into()],
            },
        )
        .unwrap();
        assert!(retry.starts_with("Retrying failed test(s)"));
    }

    #[test]
    fn test_suite_finished_lines() {
        let printer = EventPrinter::new(false);
        let ok = plain(
            printer,
            QueueEvent::SuiteFinished {
                name: "google".into(),
                round: 0,
                elapsed: Duration::from_millis(1500),
                failed: vec![],
            },
        );
        assert_eq!(ok.as_deref(), Some("✔ google took 1.500s. Retry #0"));

        let failed = plain(
            printer,
            QueueEvent::SuiteFinished {
                name: "bing".into(),
                round: 1,
                elapsed: Duration::from_millis(20),
                failed: vec![PathBuf::from("tests/t1.js"), PathBuf::from("tests/t3.js")],
            },
        );
        assert_eq!(
            failed.as_deref(),
            Some("✘ bing took 0.020s. Retry #1 - 2 failed\n  ✘ tests/t1.js\n  ✘ tests/t3.js")
        );
    }

    #[test]
    fn test_detail_only_when_verbose() {
        let event = QueueEvent::TestFinished {
            suite: "bing".into(),
            round: 0,
            file: PathBuf::from("/work/t1.js"),
            succeeded: false,
            duration: Duration::from_millis(5),
        };
        assert!(plain(EventPrinter::new(false), event.clone()).is_none());
        assert_eq!(
            plain(EventPrinter::new(true), event).as_deref(),
            Some("  ✘ /work/t1.js (0.005s)")
        );

        let clean = QueueEvent::RoundDrained {
            round: 0,
            failing_suites: 0,
        };
        assert!(plain(EventPrinter::new(true), clean).is_none());
    }
}
