//! WGSL sources of the kernels the GPU device ships.
//!
//! Every shipped kernel is an element-parallel loop over `count` (slot 0),
//! so each shader is assembled from one template: scalar slots become
//! fields of a uniform struct at binding 0, buffer slot `s` becomes a
//! storage binding `b{s}` at binding `s + 1`, and the body indexes element
//! `i`. Sources are generated once and validated before compilation.

use briny::prelude::{Validate, ValidationError};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Invocations per workgroup of every shader.
pub(crate) const WORKGROUP: usize = 256;

/// Storage element type of a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Elem {
    F32,
    I32,
}

impl Elem {
    fn wgsl(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
        }
    }
}

/// Declared type of one kernel slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Int,
    /// `f32`, either the precision-matched scalar or a fixed single.
    Float,
    Buffer { elem: Elem, writable: bool },
}

const I: Slot = Slot::Int;
const F: Slot = Slot::Float;
const IN: Slot = Slot::Buffer {
    elem: Elem::F32,
    writable: false,
};
const OUT: Slot = Slot::Buffer {
    elem: Elem::F32,
    writable: true,
};
const MASK: Slot = Slot::Buffer {
    elem: Elem::I32,
    writable: false,
};

/// A kernel shipped as WGSL.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShaderDef {
    pub(crate) op: &'static str,
    pub(crate) slots: &'static [Slot],
    body: &'static str,
}

pub(crate) const SHADERS: &[ShaderDef] = &[
    ShaderDef { op: "add", slots: &[I, IN, IN, OUT], body: "b3[i] = b1[i] + b2[i];" },
    ShaderDef { op: "element_mul", slots: &[I, IN, IN, OUT], body: "b3[i] = b1[i] * b2[i];" },
    ShaderDef { op: "div", slots: &[I, IN, IN, OUT], body: "b3[i] = b1[i] / b2[i];" },
    ShaderDef { op: "add_scalar", slots: &[I, F, OUT], body: "b2[i] = b2[i] + p.s1;" },
    ShaderDef { op: "powx", slots: &[I, IN, F, OUT], body: "b3[i] = pow(b1[i], p.s2);" },
    ShaderDef {
        op: "sign",
        slots: &[I, IN, OUT],
        body: "b2[i] = f32(b1[i] > 0.0) - f32(b1[i] < 0.0);",
    },
    ShaderDef {
        op: "ReLUForward",
        slots: &[I, IN, OUT, F],
        body: "let x = b1[i];\n    b2[i] = select(x * p.s3, x, x > 0.0);",
    },
    ShaderDef {
        op: "ReLUBackward",
        slots: &[I, IN, IN, OUT, F],
        body: "b3[i] = b1[i] * select(p.s4, 1.0, b2[i] > 0.0);",
    },
    ShaderDef {
        op: "PReLUForward",
        slots: &[I, I, I, IN, OUT, IN, I],
        body: "let c = (i / u32(p.s2)) % u32(p.s1) / u32(p.s6);\n    \
               let x = b3[i];\n    \
               b4[i] = select(x * b5[c], x, x > 0.0);",
    },
    ShaderDef {
        op: "PReLUBackward",
        slots: &[I, I, I, IN, IN, OUT, IN, I],
        body: "let c = (i / u32(p.s2)) % u32(p.s1) / u32(p.s7);\n    \
               b5[i] = b3[i] * select(b6[c], 1.0, b4[i] > 0.0);",
    },
    ShaderDef {
        op: "PReLUParamBackward",
        slots: &[I, IN, IN, OUT],
        body: "b3[i] = select(b1[i] * b2[i], 0.0, b2[i] > 0.0);",
    },
    ShaderDef {
        op: "DropoutForward",
        slots: &[I, IN, MASK, F, OUT],
        body: "b4[i] = b1[i] * f32(b2[i]) * p.s3;",
    },
    ShaderDef {
        op: "DropoutBackward",
        slots: &[I, IN, MASK, F, F, OUT],
        body: "b5[i] = select(0.0, b1[i] * p.s4, f32(b2[i]) > p.s3);",
    },
];

/// Secure wrapper for generated WGSL source.
pub(crate) struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;
        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }
        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl ShaderDef {
    /// Assembles the WGSL module of this kernel.
    pub(crate) fn source(&self) -> String {
        let mut src = String::from("struct Params {\n");
        for (slot, kind) in self.slots.iter().enumerate() {
            match kind {
                Slot::Int => {
                    let _ = writeln!(src, "    s{slot}: i32,");
                }
                Slot::Float => {
                    let _ = writeln!(src, "    s{slot}: f32,");
                }
                Slot::Buffer { .. } => {}
            }
        }
        src.push_str("}\n\n@group(0) @binding(0) var<uniform> p: Params;\n");
        for (slot, kind) in self.slots.iter().enumerate() {
            if let Slot::Buffer { elem, writable } = kind {
                let access = if *writable { "read_write" } else { "read" };
                let _ = writeln!(
                    src,
                    "@group(0) @binding({}) var<storage, {access}> b{slot}: array<{}>;",
                    slot + 1,
                    elem.wgsl()
                );
            }
        }
        let _ = write!(
            src,
            "\n@compute @workgroup_size({WORKGROUP})\n\
             fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{\n    \
             let i = gid.x;\n    \
             if (i >= u32(p.s0)) {{\n        return;\n    }}\n    \
             {}\n}}\n",
            self.body
        );
        src
    }

    /// Bytes of the uniform block, rounded up to 16.
    pub(crate) fn uniform_len(&self) -> usize {
        let scalars = self
            .slots
            .iter()
            .filter(|slot| !matches!(slot, Slot::Buffer { .. }))
            .count();
        (scalars * 4).div_ceil(16).max(1) * 16
    }
}

lazy_static::lazy_static! {
    /// Full kernel name to definition and validated source.
    pub(crate) static ref TABLE: HashMap<String, (&'static ShaderDef, String)> = SHADERS
        .iter()
        .filter_map(|def| {
            let source = def.source();
            match WgslSource(&source).validate() {
                Ok(()) => Some((format!("{}_float", def.op), (def, source))),
                Err(_) => {
                    log::error!("wgsl for {} failed validation", def.op);
                    None
                }
            }
        })
        .collect();
}
