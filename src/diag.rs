//! Environment diagnostics: quick checks a user can run before blaming the
//! camera.

use std::fmt;

/// Outcome of one environment check.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAIL" };
        write!(f, "[{mark:>4}] {}: {}", self.name, self.detail)
    }
}

/// Run every applicable environment check.
pub fn environment_report() -> Vec<Check> {
    let mut checks = vec![compiled_backends()];
    #[cfg(feature = "v4l2")]
    {
        checks.push(video_nodes());
        checks.push(enumeration());
    }
    checks
}

fn compiled_backends() -> Check {
    let mut backends: Vec<&str> = Vec::new();
    #[cfg(feature = "mock")]
    backends.push("mock");
    #[cfg(feature = "v4l2")]
    backends.push("v4l2");

    Check {
        name: "backends",
        passed: !backends.is_empty(),
        detail: if backends.is_empty() {
            "no backend compiled in".into()
        } else {
            backends.join(", ")
        },
    }
}

#[cfg(feature = "v4l2")]
fn video_nodes() -> Check {
    let nodes: Vec<String> = (0..10)
        .map(|i| format!("/dev/video{i}"))
        .filter(|p| std::path::Path::new(p).exists())
        .collect();

    Check {
        name: "video nodes",
        passed: !nodes.is_empty(),
        detail: if nodes.is_empty() {
            "no /dev/video* nodes present".into()
        } else {
            nodes.join(", ")
        },
    }
}

#[cfg(feature = "v4l2")]
fn enumeration() -> Check {
    use crate::driver::v4l2::V4l2Backend;
    use crate::driver::CameraBackend;

    match V4l2Backend::new().enumerate() {
        Ok(devices) => Check {
            name: "enumeration",
            passed: true,
            detail: format!("{} capture device(s)", devices.len()),
        },
        Err(err) => Check {
            name: "enumeration",
            passed: false,
            detail: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_always_lists_compiled_backends() {
        let report = environment_report();
        let backends = report.iter().find(|c| c.name == "backends").unwrap();
        assert!(backends.passed);
        assert!(backends.detail.contains("mock"));
    }
}
