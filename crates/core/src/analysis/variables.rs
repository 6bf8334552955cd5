//! Stack variable recovery over lifted IR.
//!
//! Lifting rules spell every memory access as a typed dereference,
//! `*(T *)(address)`. An access whose address is a frame or stack pointer
//! plus a constant displacement is a stack slot; each distinct
//! `(base, offset)` slot becomes one variable, typed by the widest access
//! seen and signed if any access was signed.
//!
//! Names follow the slot: `var_8` for `rbp - 8`, `arg_10` for `rbp + 0x10`,
//! `stack_18` for `rsp + 0x18`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backends::rules::c_type;
use crate::model::{parse_immediate, Condition, Ir, IrOp, Target};

const FRAME_REGISTERS: [&str; 4] = ["rbp", "ebp", "x29", "fp"];
const STACK_REGISTERS: [&str; 3] = ["rsp", "esp", "sp"];

/// One recovered stack slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub base: String,
    pub offset: i64,
    /// Widest access in bytes.
    pub size: u32,
    pub signed: bool,
    pub reads: usize,
    pub writes: usize,
}

impl Variable {
    pub fn c_type(&self) -> &'static str {
        c_type(self.size, self.signed)
    }

    /// The address expression the variable stands for.
    pub fn slot(&self) -> String {
        match self.offset {
            0 => self.base.clone(),
            o if o < 0 => format!("{} - 0x{:x}", self.base, o.unsigned_abs()),
            o => format!("{} + 0x{o:x}", self.base),
        }
    }
}

/// One access of a variable by an IR node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAccess {
    /// Position of the IR node in the lifted sequence.
    pub ir_index: usize,
    pub variable: usize,
    pub size: u32,
    pub write: bool,
}

/// Variables and data accesses of one lifted sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    variables: Vec<Variable>,
    accesses: Vec<DataAccess>,
    slots: BTreeMap<(String, i64), usize>,
}

impl Variables {
    /// Collect stack accesses from `ir`. Nodes whose data does not decode
    /// are skipped.
    pub fn analyze(ir: &[Ir]) -> Self {
        let mut out = Self::default();
        for (ir_index, node) in ir.iter().enumerate() {
            let Ok(op) = IrOp::decode(&node.data) else {
                continue;
            };
            for (operand, write) in operands(&op) {
                out.collect(ir_index, operand, write);
            }
        }
        tracing::debug!(variables = out.variables.len(), accesses = out.accesses.len(), "variables");
        out
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn accesses(&self) -> &[DataAccess] {
        &self.accesses
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn into_variables(self) -> Vec<Variable> {
        self.variables
    }

    /// Ids of the variables `op` touches, in operand order, without repeats.
    pub fn used_by(&self, op: &IrOp) -> Vec<usize> {
        let mut ids = Vec::new();
        for (operand, _) in operands(op) {
            self.visit(operand, &mut |id| {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            });
        }
        ids
    }

    /// `op` with every stack slot access replaced by its variable name.
    /// Narrower accesses keep a cast: `*(uint8_t *)&var_8`.
    pub fn rename(&self, op: &IrOp) -> IrOp {
        if self.is_empty() {
            return op.clone();
        }
        map_operands(op, |operand| self.rewrite(operand))
    }

    fn collect(&mut self, ir_index: usize, operand: &str, write: bool) {
        let whole = operand.trim();
        for deref in derefs(operand) {
            let Some((base, offset)) = stack_slot(deref.address) else {
                // Address arithmetic may itself read the stack.
                self.collect(ir_index, deref.address, false);
                continue;
            };
            let Some((size, signed)) = type_width(deref.ty) else {
                continue;
            };
            let write = write && deref.text == whole;
            let id = self.slot_id(base, offset);
            let variable = &mut self.variables[id];
            variable.size = variable.size.max(size);
            variable.signed |= signed;
            if write {
                variable.writes += 1;
            } else {
                variable.reads += 1;
            }
            self.accesses.push(DataAccess { ir_index, variable: id, size, write });
        }
    }

    fn slot_id(&mut self, base: &str, offset: i64) -> usize {
        if let Some(&id) = self.slots.get(&(base.to_string(), offset)) {
            return id;
        }
        let mut name = slot_name(base, offset);
        if self.variables.iter().any(|v| v.name == name) {
            name = format!("{name}_{base}");
        }
        let id = self.variables.len();
        self.variables.push(Variable {
            name,
            base: base.to_string(),
            offset,
            size: 0,
            signed: false,
            reads: 0,
            writes: 0,
        });
        self.slots.insert((base.to_string(), offset), id);
        id
    }

    fn lookup(&self, address: &str) -> Option<usize> {
        let (base, offset) = stack_slot(address)?;
        self.slots.get(&(base.to_string(), offset)).copied()
    }

    fn visit(&self, operand: &str, f: &mut impl FnMut(usize)) {
        for deref in derefs(operand) {
            match self.lookup(deref.address) {
                Some(id) => f(id),
                None => self.visit(deref.address, f),
            }
        }
    }

    fn rewrite(&self, operand: &str) -> String {
        let mut out = String::with_capacity(operand.len());
        let mut last = 0;
        for deref in derefs(operand) {
            out.push_str(&operand[last..deref.start]);
            match self.lookup(deref.address) {
                Some(id) => {
                    let variable = &self.variables[id];
                    match type_width(deref.ty) {
                        Some((size, _)) if size == variable.size => out.push_str(&variable.name),
                        _ => out.push_str(&format!("*({} *)&{}", deref.ty, variable.name)),
                    }
                }
                None => {
                    out.push_str(&format!("*({} *)({})", deref.ty, self.rewrite(deref.address)))
                }
            }
            last = deref.start + deref.text.len();
        }
        out.push_str(&operand[last..]);
        out
    }
}

/// A `*(T *)(address)` occurrence inside an operand.
struct Deref<'a> {
    start: usize,
    text: &'a str,
    ty: &'a str,
    address: &'a str,
}

fn derefs(expr: &str) -> Vec<Deref<'_>> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(rel) = expr[from..].find("*(") {
        let start = from + rel;
        let rest = &expr[start + 2..];
        let Some(ty_end) = rest.find(" *)(") else {
            break;
        };
        let ty = &rest[..ty_end];
        let open = start + 2 + ty_end + 4;
        match (type_width(ty), matching_paren(expr, open)) {
            (Some(_), Some(close)) => {
                found.push(Deref {
                    start,
                    text: &expr[start..=close],
                    ty,
                    address: &expr[open..close],
                });
                from = close + 1;
            }
            _ => from = start + 2,
        }
    }
    found
}

/// Index of the `)` closing a group whose content starts at `open`.
fn matching_paren(expr: &str, open: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in expr[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `base`, `base + disp` or `base - disp` with a frame or stack register.
fn stack_slot(address: &str) -> Option<(&str, i64)> {
    let address = address.trim();
    let (base, offset) = match address.find([' ', '+', '-']) {
        None => (address, 0),
        Some(pos) => {
            let rest = address[pos..].trim();
            let (negative, disp) = match rest.strip_prefix('-') {
                Some(disp) => (true, disp),
                None => (false, rest.strip_prefix('+')?),
            };
            let value = i64::try_from(parse_immediate(disp.trim())?).ok()?;
            (address[..pos].trim(), if negative { -value } else { value })
        }
    };
    (FRAME_REGISTERS.contains(&base) || STACK_REGISTERS.contains(&base)).then_some((base, offset))
}

fn slot_name(base: &str, offset: i64) -> String {
    let frame = FRAME_REGISTERS.contains(&base);
    match (frame, offset < 0) {
        (true, true) => format!("var_{:x}", offset.unsigned_abs()),
        (true, false) => format!("arg_{offset:x}"),
        (false, false) => format!("stack_{offset:x}"),
        (false, true) => format!("stack_m{:x}", offset.unsigned_abs()),
    }
}

/// Size and signedness of a type spelled by `c_type`.
fn type_width(ty: &str) -> Option<(u32, bool)> {
    let width = match ty {
        "uint8_t" => (1, false),
        "uint16_t" => (2, false),
        "uint32_t" => (4, false),
        "uint64_t" => (8, false),
        "uint128_t" => (16, false),
        "int8_t" => (1, true),
        "int16_t" => (2, true),
        "int32_t" => (4, true),
        "int64_t" => (8, true),
        _ => return None,
    };
    Some(width)
}

/// String operands of `op` with whether each is written.
fn operands(op: &IrOp) -> Vec<(&str, bool)> {
    match op {
        IrOp::Assign { dst, src } | IrOp::Unary { dst, src, .. } => {
            vec![(dst.as_str(), true), (src.as_str(), false)]
        }
        IrOp::Binary { dst, lhs, rhs, .. } => {
            vec![(dst.as_str(), true), (lhs.as_str(), false), (rhs.as_str(), false)]
        }
        IrOp::Compare { lhs, rhs, .. } => vec![(lhs.as_str(), false), (rhs.as_str(), false)],
        IrOp::Push { value } => vec![(value.as_str(), false)],
        IrOp::Pop { dst } => vec![(dst.as_str(), true)],
        IrOp::Jump { target: t } | IrOp::Call { target: t } => {
            indirect(t).map(|e| (e, false)).into_iter().collect()
        }
        IrOp::CondJump { condition, target: t } => {
            let mut out = Vec::new();
            if let Condition::Zero { operand } | Condition::NonZero { operand } = condition {
                out.push((operand.as_str(), false));
            }
            out.extend(indirect(t).map(|e| (e, false)));
            out
        }
        IrOp::Intrinsic { args, .. } => args.iter().map(|a| (a.as_str(), false)).collect(),
        IrOp::Return | IrOp::Nop | IrOp::Unlifted { .. } => Vec::new(),
    }
}

fn indirect(target: &Target) -> Option<&str> {
    match target {
        Target::Indirect(expr) => Some(expr.as_str()),
        Target::Direct(_) => None,
    }
}

/// `op` with `f` applied to every string operand.
fn map_operands(op: &IrOp, f: impl Fn(&str) -> String) -> IrOp {
    let target = |target: &Target| match target {
        Target::Indirect(expr) => Target::Indirect(f(expr)),
        Target::Direct(address) => Target::Direct(*address),
    };
    match op {
        IrOp::Assign { dst, src } => IrOp::Assign { dst: f(dst), src: f(src) },
        IrOp::Binary { dst, lhs, operator, rhs } => {
            IrOp::Binary { dst: f(dst), lhs: f(lhs), operator: *operator, rhs: f(rhs) }
        }
        IrOp::Unary { dst, operator, src } => {
            IrOp::Unary { dst: f(dst), operator: *operator, src: f(src) }
        }
        IrOp::Compare { lhs, rhs, test } => IrOp::Compare { lhs: f(lhs), rhs: f(rhs), test: *test },
        IrOp::Push { value } => IrOp::Push { value: f(value) },
        IrOp::Pop { dst } => IrOp::Pop { dst: f(dst) },
        IrOp::Jump { target: t } => IrOp::Jump { target: target(t) },
        IrOp::Call { target: t } => IrOp::Call { target: target(t) },
        IrOp::CondJump { condition, target: t } => {
            let condition = match condition {
                Condition::Zero { operand } => Condition::Zero { operand: f(operand) },
                Condition::NonZero { operand } => Condition::NonZero { operand: f(operand) },
                other => other.clone(),
            };
            IrOp::CondJump { condition, target: target(t) }
        }
        IrOp::Intrinsic { name, args } => {
            IrOp::Intrinsic { name: name.clone(), args: args.iter().map(|a| f(a)).collect() }
        }
        IrOp::Return | IrOp::Nop | IrOp::Unlifted { .. } => op.clone(),
    }
}
