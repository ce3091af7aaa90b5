use crate::settings::{LoggingSettings, RedactionConfig};
use regex::Regex;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Masks the password that follows the engine's first-run announcement.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[(
    r"(initial password is:)\s*\S+",
    "$1 [REDACTED]",
)];

struct RedactingWriter<W> {
    inner: W,
    patterns: Vec<(Regex, String)>,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let mut redacted = s.to_string();
        for (re, replacement) in &self.patterns {
            redacted = re.replace_all(&redacted, replacement.as_str()).to_string();
        }
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes to stderr; stdout is reserved for command results.
struct RedactingMakeWriter {
    patterns: Vec<(Regex, String)>,
}

impl<'a> fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

fn redaction_patterns(config: &RedactionConfig) -> Vec<(Regex, String)> {
    if !config.enabled {
        return Vec::new();
    }
    let defaults = DEFAULT_PATTERNS
        .iter()
        .filter(|_| config.use_default_patterns)
        .map(|(re, placeholder)| (re.to_string(), placeholder.to_string(), "default"));
    let configured = config
        .patterns
        .iter()
        .map(|p| (p.regex.clone(), p.placeholder.clone(), p.name.as_str()));

    defaults
        .chain(configured)
        .filter_map(|(re, placeholder, name)| match Regex::new(&re) {
            Ok(re) => Some((re, placeholder)),
            Err(e) => {
                eprintln!("warning: ignoring redaction pattern {}: {}", name, e);
                None
            }
        })
        .collect()
}

pub fn init_logging(config: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let make_writer = RedactingMakeWriter {
        patterns: redaction_patterns(&config.redaction),
    };

    // Use Layer::boxed() to unify the types of the branches
    let fmt_layer = match (config.json, config.show_time) {
        (true, _) => fmt::layer().json().with_writer(make_writer).boxed(),
        (false, true) => fmt::layer()
            .with_writer(make_writer)
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
        (false, false) => fmt::layer()
            .with_writer(make_writer)
            .with_target(true)
            .with_thread_ids(false)
            .without_time()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RedactionPattern;
    use std::io::Write;

    fn redact(config: &RedactionConfig, line: &str) -> String {
        let mut writer = RedactingWriter {
            inner: Vec::new(),
            patterns: redaction_patterns(config),
        };
        writer.write_all(line.as_bytes()).unwrap();
        String::from_utf8(writer.inner).unwrap()
    }

    #[test]
    fn test_default_pattern_masks_initial_password() {
        let line = "Successfully created the admin user and the initial password is: Xk9pQ2\n";
        let out = redact(&RedactionConfig::default(), line);
        assert!(!out.contains("Xk9pQ2"));
        assert!(out.contains("initial password is: [REDACTED]"));
    }

    #[test]
    fn test_configured_pattern_and_disable() {
        let mut config = RedactionConfig {
            patterns: vec![
                RedactionPattern {
                    name: "token".into(),
                    regex: r"token=\w+".into(),
                    placeholder: "token=***".into(),
                },
                RedactionPattern {
                    name: "broken".into(),
                    regex: "(".into(),
                    placeholder: "".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(redact(&config, "GET /?token=abc123"), "GET /?token=***");

        config.enabled = false;
        assert_eq!(redact(&config, "GET /?token=abc123"), "GET /?token=abc123");
    }
}
