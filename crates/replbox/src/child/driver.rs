//! Driver program synthesis
//!
//! The interpreter child is never pointed at the user's file directly; it
//! runs a short driver program that executes the script into a fresh
//! globals mapping and, if the script finishes cleanly, hands the same
//! mapping to an interactive console. The driver announces lifecycle
//! events on stderr with fixed marker lines so the supervisor can track
//! them without guessing from user output.

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;
use tracing::debug;

use crate::child::ChildError;

/// Marker emitted on stderr when the script finished with status 0 and
/// the interactive loop is about to start. Never forwarded to the client.
pub const REPL_READY_SENTINEL: &str = "__REPL_READY__";

/// Marker emitted on stderr immediately before the child blocks on a
/// stdin read during the script phase. Never forwarded to the client.
pub const INPUT_REQUEST_SENTINEL: &str = "__INPUT_REQUEST__";

/// Marker pair wrapping a base64 figure payload on stdout.
pub const FIGURE_BEGIN_SENTINEL: &str = "__FIGURE_BEGIN__";
/// Closing marker of a figure payload.
pub const FIGURE_END_SENTINEL: &str = "__FIGURE_END__";

/// The driver program source. Invoked as:
/// `python3 -u driver.py <workspace_dir> <script_path>`
const DRIVER_SOURCE: &str = r##"import builtins
import code
import os
import sys
import traceback

_DRIVER_FILE = __file__
_REPL_READY = "__REPL_READY__"
_INPUT_REQUEST = "__INPUT_REQUEST__"
_FIGURE_BEGIN = "__FIGURE_BEGIN__"
_FIGURE_END = "__FIGURE_END__"

workspace_dir = sys.argv[1]
script_path = sys.argv[2]

os.chdir(workspace_dir)

_real_input = builtins.input


def _marked_input(prompt=""):
    # Prompt goes to stdout unterminated; the marker on stderr tells the
    # supervisor the read is about to block.
    if prompt:
        sys.stdout.write(str(prompt))
        sys.stdout.flush()
    sys.stderr.write(_INPUT_REQUEST + "\n")
    sys.stderr.flush()
    return _real_input()


_figures_hooked = False


def _hook_figures():
    global _figures_hooked
    if _figures_hooked:
        return
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt
    except ImportError:
        return

    def _emit_figure(*args, **kwargs):
        import base64
        import io
        buf = io.BytesIO()
        plt.savefig(buf, format="png", bbox_inches="tight", dpi=100)
        buf.seek(0)
        sys.stdout.write(_FIGURE_BEGIN + "\n")
        sys.stdout.write(base64.b64encode(buf.read()).decode("ascii") + "\n")
        sys.stdout.write(_FIGURE_END + "\n")
        sys.stdout.flush()
        plt.close("all")

    plt.show = _emit_figure
    _figures_hooked = True


_real_import = builtins.__import__


def _watching_import(name, *args, **kwargs):
    module = _real_import(name, *args, **kwargs)
    if name.partition(".")[0] == "matplotlib":
        _hook_figures()
    return module


builtins.__import__ = _watching_import
builtins.input = _marked_input

script_globals = {"__name__": "__main__", "__file__": script_path}

try:
    with open(script_path, "r") as handle:
        source = handle.read()
    exec(compile(source, script_path, "exec"), script_globals)
except SystemExit as exc:
    status = exc.code if exc.code is not None else 0
    if not isinstance(status, int):
        sys.stderr.write(str(status) + "\n")
        sys.stderr.flush()
        sys.exit(1)
    if status != 0:
        sys.exit(status)
except BaseException:
    # Show the student their own frames, not the driver's.
    lines = traceback.format_exc().splitlines(keepends=True)
    filtered = []
    skip_source_line = False
    for line in lines:
        if _DRIVER_FILE in line:
            skip_source_line = True
            continue
        if skip_source_line and line.startswith("    "):
            continue
        skip_source_line = False
        filtered.append(line)
    sys.stderr.writelines(filtered)
    sys.stderr.flush()
    sys.exit(1)

builtins.input = _real_input
sys.stdout.flush()
sys.stderr.write(_REPL_READY + "\n")
sys.stderr.flush()

console = code.InteractiveConsole(locals=script_globals)
while True:
    line = sys.stdin.readline()
    if line == "":
        break
    try:
        console.push(line.rstrip("\n"))
    except SystemExit:
        break
    sys.stdout.flush()
    sys.stderr.flush()

sys.exit(0)
"##;

/// A staged driver program on disk.
///
/// The temp file is removed when this value is dropped, so the supervisor
/// keeps it alive for the child's lifetime.
#[derive(Debug)]
pub struct DriverScript {
    path: TempPath,
}

impl DriverScript {
    /// Write the driver program to a temp file
    pub fn stage() -> Result<Self, ChildError> {
        let mut file = tempfile::Builder::new()
            .prefix("replbox-driver-")
            .suffix(".py")
            .tempfile()
            .map_err(ChildError::DriverStaging)?;

        file.write_all(DRIVER_SOURCE.as_bytes())
            .map_err(ChildError::DriverStaging)?;
        file.flush().map_err(ChildError::DriverStaging)?;

        let path = file.into_temp_path();
        debug!(path = %path.display(), "staged driver program");

        Ok(Self { path })
    }

    /// Path of the staged driver file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The driver program source
    pub fn source() -> &'static str {
        DRIVER_SOURCE
    }
}
