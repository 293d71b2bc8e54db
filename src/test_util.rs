//! Shared helpers for unit tests
//!
//! External tools are replaced with `sh -c` scripts through the
//! configurable tool command lines, so tests run without mtools.

use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;

/// Listing printed by the fake `mdir`
pub const MDIR_FIXTURE: &str = " Volume in drive : has no label
 Volume Serial Number is 6515-5815
Directory for ::/

5years1  adf    901120 2018-12-02  20:30
BARBAR~1 ADF    901120 2018-11-24  22:44  Barbarian Plus 6.adf
        2 files           1 802 240 bytes
                          1 024 000 bytes free
";

/// Tool command running `script` through `sh -c`, with `name` as `$0`
pub fn sh_tool(name: &str, script: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        name.to_string(),
    ]
}

/// Tools that record every invocation in `<dir>/tools.log`; `mdir` prints
/// [`MDIR_FIXTURE`]
pub fn fake_tools(dir: &Path) -> ToolsConfig {
    let log = tools_log(dir);
    let fixture = dir.join("mdir.out");
    std::fs::write(&fixture, MDIR_FIXTURE).unwrap();

    let record = |name: &str| {
        sh_tool(
            name,
            &format!("echo \"$0 $*\" >> '{}'", log.display()),
        )
    };

    ToolsConfig {
        mdir: sh_tool("mdir", &format!("cat '{}'", fixture.display())),
        mcopy: record("mcopy"),
        mkfs: record("mkfs"),
    }
}

/// Tools that keep an image's directory in a `<image>.files` sidecar
///
/// `mkfs` empties the directory, `mcopy <file> ::` appends an mdir-style
/// entry for the file and `mdir` prints the entries in copy order.
pub fn stateful_tools() -> ToolsConfig {
    ToolsConfig {
        mdir: sh_tool(
            "mdir",
            r#"echo 'Directory for ::/'; echo; cat "$2.files" 2>/dev/null; true"#,
        ),
        mcopy: sh_tool(
            "mcopy",
            r#"[ "$4" = "::" ] || exit 0
size=$(wc -c < "$3" | tr -d ' ')
printf 'ADFFILE  ADF %10d 2020-01-01  12:00  %s\n' "$size" "$(basename "$3")" >> "$2.files""#,
        ),
        mkfs: sh_tool("mkfs", r#": > "$1.files""#),
    }
}

/// Tool that writes `message` to stderr and exits non-zero
pub fn failing_tool(name: &str, message: &str) -> Vec<String> {
    sh_tool(name, &format!("echo '{}' >&2; exit 1", message))
}

pub fn tools_log(dir: &Path) -> PathBuf {
    dir.join("tools.log")
}

/// Recorded invocations, one per line
pub fn logged_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(tools_log(dir))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Whether the real mtools/dosfstools binaries are on PATH
pub fn real_tools_available() -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    ["mdir", "mcopy", "mkdosfs"].iter().all(|tool| {
        std::env::split_paths(&path).any(|dir| dir.join(tool).is_file())
    })
}
