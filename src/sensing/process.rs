use std::ffi::OsStr;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Overrides parent-process detection, e.g. when a launcher sits between the
/// browser and the host.
pub const BROWSER_PID_ENV: &str = "EURORA_BROWSER_PID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProcess {
    pub pid: u32,
    pub name: String,
}

impl BrowserProcess {
    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }
}

fn process_name(raw: &OsStr) -> String {
    raw.to_string_lossy().into_owned()
}

fn parse_pid_override(value: Option<String>) -> Option<u32> {
    value.and_then(|raw| raw.trim().parse().ok())
}

/// Browsers start native hosts as direct children, so the browser is our
/// parent process unless the environment says otherwise.
pub fn detect_browser() -> Option<BrowserProcess> {
    let mut system = System::new();
    let pid = match parse_pid_override(std::env::var(BROWSER_PID_ENV).ok()) {
        Some(pid) => Pid::from_u32(pid),
        None => {
            let own = Pid::from_u32(std::process::id());
            system.refresh_processes(ProcessesToUpdate::Some(&[own]));
            system.process(own)?.parent()?
        }
    };

    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    let process = system.process(pid)?;
    Some(BrowserProcess {
        pid: pid.as_u32(),
        name: process_name(process.name()),
    })
}

pub fn display_name(process_name: &str) -> String {
    let lower = process_name.to_ascii_lowercase();
    let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
    let known = match stem {
        "chrome" | "google chrome" | "google-chrome" => "Google Chrome",
        "chromium" | "chromium-browser" => "Chromium",
        "firefox" | "firefox-bin" => "Firefox",
        "librewolf" => "LibreWolf",
        "msedge" | "microsoft edge" => "Microsoft Edge",
        "brave" | "brave browser" => "Brave",
        "opera" => "Opera",
        "vivaldi" => "Vivaldi",
        "safari" => "Safari",
        "arc" => "Arc",
        _ => return process_name.to_string(),
    };
    known.to_string()
}
