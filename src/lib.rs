// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::error::Error;
use std::fmt::Write;

/// Render an error and its sources as an indented, numbered chain followed
/// by the debug representation of the top level error.
pub fn format_error_chain(top_error: &dyn Error, component: &str) -> String {
    let mut out = String::new();

    let _ = write!(out, "Error: {component} exited with the following ");
    if top_error.source().is_none() {
        let _ = writeln!(out, "error:");
        let _ = writeln!(out, "  {top_error}");
    } else {
        let _ = writeln!(out, "chain of errors:");
        for (level, error) in std::iter::successors(Some(top_error), |e| (*e).source()).enumerate()
        {
            let _ = writeln!(out, "  {level}: {error}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Debug Info: {top_error:?}");

    out
}

/// Print the chain of errors that made `component` give up.
pub fn cli_print_error_chain(top_error: &dyn Error, component: &str) {
    eprint!("{}", format_error_chain(top_error, component));
}
