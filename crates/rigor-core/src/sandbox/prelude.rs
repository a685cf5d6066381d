//! Sanity-check helpers prepended to executed Python scripts.
//!
//! The ledger and the archived script keep the analyst's code only; the
//! prelude exists solely in the transient file handed to the interpreter.

pub const SANITY_PRELUDE: &str = r#"# --- rigor sanity helpers (injected) ---
import numpy as np

def _validate_input(arr, name="data"):
    """Raise on inputs that cannot be analyzed honestly."""
    if arr is None:
        raise ValueError(f"RIGOR: {name} is None, cannot analyze missing data")
    arr = np.asarray(arr)
    if arr.size == 0:
        raise ValueError(f"RIGOR: {name} is empty, no data to analyze")
    nan_pct = 100 * np.sum(np.isnan(arr)) / arr.size
    if nan_pct > 50:
        raise ValueError(f"RIGOR: {name} is {nan_pct:.0f}% NaN, data is corrupted")
    elif nan_pct > 0:
        print(f"WARNING: {name} contains {nan_pct:.1f}% NaN values")
    if np.all(arr == 0):
        raise ValueError(f"RIGOR: {name} is all zeros, check recording")
    if np.std(arr[np.isfinite(arr)]) == 0:
        raise ValueError(f"RIGOR: {name} has zero variance, recording failure?")
    return arr

def _check_range(value, name, lo, hi):
    """Warn if value is outside the expected range."""
    if not (lo <= value <= hi):
        print(f"WARNING: {name}={value:.4g} outside expected range [{lo}, {hi}]")
    return value
# --- end rigor sanity helpers ---

"#;

/// Script text actually handed to the interpreter.
pub fn compose_script(code: &str, inject: bool) -> String {
    if inject {
        format!("{SANITY_PRELUDE}{code}")
    } else {
        code.to_string()
    }
}
