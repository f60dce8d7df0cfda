//! Program source embedding.
//!
//! The compositing program is normally loaded from disk at context creation
//! so deployments can swap it without rebuilding. A copy is also compiled
//! into the crate for hosts that ship no resource directory.

/// Source of `kernels/composite.cl`.
///
/// # Entry points
///
/// | Kernel                   | Operation                   |
/// |--------------------------|-----------------------------|
/// | `compositeAlphaDarken32` | `CompositeOp::AlphaDarken32` |
/// | `compositeOver32`        | `CompositeOp::Over32`        |
pub const COMPOSITE_SOURCE: &str = include_str!("../kernels/composite.cl");

/// Embedded program source by resource name.
pub fn embedded_source(name: &str) -> Option<&'static str> {
    match name {
        "composite.cl" => Some(COMPOSITE_SOURCE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_common::CompositeOp;

    /// Kernel entry points declared in an OpenCL C source text.
    ///
    /// A lexical scan for `kernel void <name>(` / `__kernel void <name>(`; it
    /// does not understand macros or comments.
    fn declared_kernels(source: &str) -> Vec<&str> {
        let mut names = Vec::new();
        let mut tokens = source
            .split(|c: char| c.is_whitespace() || c == '(')
            .filter(|t| !t.is_empty())
            .peekable();
        while let Some(token) = tokens.next() {
            if token != "kernel" && token != "__kernel" {
                continue;
            }
            if tokens.peek() == Some(&"void") {
                tokens.next();
                if let Some(name) = tokens.next() {
                    names.push(name);
                }
            }
        }
        names
    }

    #[test]
    fn embedded_program_declares_every_op() {
        let declared = declared_kernels(COMPOSITE_SOURCE);
        for op in CompositeOp::ALL {
            assert!(
                declared.contains(&op.entry_point()),
                "missing kernel {}",
                op.entry_point()
            );
        }
    }

    #[test]
    fn unknown_resource_returns_none() {
        assert!(embedded_source("composite.cl").is_some());
        assert!(embedded_source("nonexistent_program.cl").is_none());
    }

    #[test]
    fn declared_kernels_scan() {
        let src = "__kernel void a(int x) {}\nkernel void b (float y) {}\nvoid helper() {}";
        assert_eq!(declared_kernels(src), vec!["a", "b"]);
    }
}
