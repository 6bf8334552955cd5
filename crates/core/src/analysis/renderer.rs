//! Pseudocode rendering of a lifted graph.
//!
//! Nodes are laid out by address and cut into basic blocks at entries,
//! branch and call targets, after terminators, at address gaps and where
//! the recorded parent is not the preceding instruction. Blocks are grouped
//! into functions rooted at entries and call targets; a function claims
//! every block reachable from its root through jumps and fallthrough that
//! no other root has claimed. Whatever is left is emitted last.
//!
//! Stack slots found by `Variables` are declared at the top of each
//! function that touches them and referred to by name.
//!
//! Every IR node produces exactly one indented statement line. Comment
//! lines, labels and declarations (which end in a `/* slot */` comment)
//! never count as statements.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::analysis::variables::Variables;
use crate::model::{Assembly, AssemblyPayload, Ir, IrOp, Target};

enum Statement {
    Op(IrOp),
    Unparsed(String),
}

struct Node {
    index: usize,
    address: u64,
    size: u64,
    parent: u64,
    text: String,
    undecodable: bool,
    statements: Vec<Statement>,
}

impl Node {
    fn ops(&self) -> impl Iterator<Item = &IrOp> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Op(op) => Some(op),
            Statement::Unparsed(_) => None,
        })
    }

    fn ends_block(&self) -> bool {
        self.undecodable
            || self.ops().any(|op| {
                op.ends_flow() || matches!(op, IrOp::CondJump { .. } | IrOp::Jump { .. })
            })
    }

    fn ends_flow(&self) -> bool {
        self.undecodable || self.ops().any(IrOp::ends_flow)
    }

    fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

struct Block {
    start: u64,
    nodes: Vec<usize>,
}

fn parse_statement(data: &str) -> Statement {
    match IrOp::decode(data) {
        Ok(op) => Statement::Op(op),
        Err(_) => Statement::Unparsed(data.to_string()),
    }
}

/// Render `assembly` and `ir` as C-like pseudocode.
pub fn render(assembly: &[Assembly], ir: &[Ir]) -> String {
    render_with_variables(assembly, ir, &Variables::analyze(ir))
}

/// `render` with stack variables already recovered from `ir`.
pub fn render_with_variables(assembly: &[Assembly], ir: &[Ir], variables: &Variables) -> String {
    let position: HashMap<usize, usize> =
        assembly.iter().enumerate().map(|(pos, node)| (node.index, pos)).collect();

    let mut statements: Vec<Vec<Statement>> = assembly.iter().map(|_| Vec::new()).collect();
    let mut stray = Vec::new();
    for node in ir {
        match position.get(&node.parents_assembly_index) {
            Some(&pos) => statements[pos].push(parse_statement(&node.data)),
            None => stray.push((node.parents_assembly_index, parse_statement(&node.data))),
        }
    }

    let mut nodes = Vec::new();
    let mut unplaced = Vec::new();
    for (node, statements) in assembly.iter().zip(statements) {
        match AssemblyPayload::decode(&node.data) {
            Ok(payload) => {
                let text = match &payload {
                    AssemblyPayload::Decoded(insn) => insn.text(),
                    AssemblyPayload::Undecodable { bytes, .. } => format!("(bad) {bytes}"),
                };
                nodes.push(Node {
                    index: node.index,
                    address: payload.address(),
                    size: payload.size(),
                    parent: node.parents_start_address,
                    text,
                    undecodable: payload.is_undecodable(),
                    statements,
                });
            }
            Err(_) => unplaced.push((node.index, statements)),
        }
    }
    nodes.sort_by_key(|n| (n.address, n.index));

    let blocks = split_blocks(&nodes);
    let block_at: HashMap<u64, usize> =
        blocks.iter().enumerate().map(|(id, b)| (b.start, id)).collect();
    let edges = block_edges(&nodes, &blocks, &block_at);

    let call_targets: HashSet<u64> =
        nodes.iter().flat_map(|n| n.ops().filter_map(IrOp::call_target)).collect();
    let roots: Vec<usize> = blocks
        .iter()
        .enumerate()
        .filter(|(_, block)| {
            let first = &nodes[block.nodes[0]];
            first.parent == first.address || call_targets.contains(&block.start)
        })
        .map(|(id, _)| id)
        .collect();
    let owner = claim_blocks(blocks.len(), &roots, &edges);

    let labels: HashSet<u64> = block_at.keys().copied().collect();
    let functions: HashSet<u64> = roots.iter().map(|&id| blocks[id].start).collect();
    let ctx = Context { labels: &labels, functions: &functions, variables };

    let mut out = Emitter::default();
    for &root in &roots {
        let owned: Vec<&Block> = blocks
            .iter()
            .enumerate()
            .filter(|(id, _)| owner[*id] == Some(root))
            .map(|(_, block)| block)
            .collect();
        out.line(format!("void sub_{:x}(void)", blocks[root].start));
        out.line("{");
        declare(&mut out, variables, &owned, &nodes);
        for block in owned {
            emit_block(&mut out, &ctx, block, &nodes);
        }
        out.line("}");
        out.blank();
    }

    let orphans: Vec<&Block> = blocks
        .iter()
        .enumerate()
        .filter(|(id, _)| owner[*id].is_none())
        .map(|(_, block)| block)
        .collect();
    if !orphans.is_empty() {
        out.line("// blocks not reached from any entry or call target");
        out.line("{");
        declare(&mut out, variables, &orphans, &nodes);
        for block in orphans {
            emit_block(&mut out, &ctx, block, &nodes);
        }
        out.line("}");
        out.blank();
    }

    // Nodes without an address are printed as lifted, without names.
    let plain = Variables::default();
    let ctx = Context { variables: &plain, ..ctx };

    if !unplaced.is_empty() || !stray.is_empty() {
        out.line("// nodes without a readable address");
        out.line("{");
        for (index, statements) in &unplaced {
            out.line(format!("asm_{index}:"));
            if statements.is_empty() {
                out.line("    // no ir");
            }
            for statement in statements {
                out.line(format!("    {}", ctx.statement(statement)));
            }
        }
        for (parent, statement) in &stray {
            out.line(format!("    {}  // missing assembly #{parent}", ctx.statement(statement)));
        }
        out.line("}");
        out.blank();
    }

    out.finish()
}

fn split_blocks(nodes: &[Node]) -> Vec<Block> {
    let targets: HashSet<u64> = nodes
        .iter()
        .flat_map(|n| n.ops().filter_map(|op| op.branch_target().or_else(|| op.call_target())))
        .collect();

    let mut blocks: Vec<Block> = Vec::new();
    for (pos, node) in nodes.iter().enumerate() {
        let leader = match pos.checked_sub(1).map(|p| &nodes[p]) {
            None => true,
            Some(prev) => {
                node.parent == node.address
                    || targets.contains(&node.address)
                    || prev.end() != node.address
                    || prev.ends_block()
                    || node.parent != prev.address
            }
        };
        match blocks.last_mut() {
            Some(block) if !leader => block.nodes.push(pos),
            _ => blocks.push(Block { start: node.address, nodes: vec![pos] }),
        }
    }
    blocks
}

fn block_edges(nodes: &[Node], blocks: &[Block], block_at: &HashMap<u64, usize>) -> Vec<Vec<usize>> {
    blocks
        .iter()
        .enumerate()
        .map(|(id, block)| {
            let mut succ = Vec::new();
            let Some(&last_pos) = block.nodes.last() else {
                return succ;
            };
            let last = &nodes[last_pos];
            if !last.ends_flow() {
                if let Some(next) = blocks.get(id + 1) {
                    if next.start == last.end() {
                        succ.push(id + 1);
                    }
                }
            }
            for target in last.ops().filter_map(IrOp::branch_target) {
                if let Some(&target_id) = block_at.get(&target) {
                    succ.push(target_id);
                }
            }
            succ
        })
        .collect()
}

fn claim_blocks(count: usize, roots: &[usize], edges: &[Vec<usize>]) -> Vec<Option<usize>> {
    let mut owner = vec![None; count];
    for &root in roots {
        owner[root] = Some(root);
    }
    for &root in roots {
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for &next in &edges[id] {
                if owner[next].is_none() {
                    owner[next] = Some(root);
                    queue.push_back(next);
                }
            }
        }
    }
    owner
}

/// Declarations of the variables used by `blocks`, in first-seen order.
fn declare(out: &mut Emitter, variables: &Variables, blocks: &[&Block], nodes: &[Node]) {
    if variables.is_empty() {
        return;
    }
    let used: BTreeSet<usize> = blocks
        .iter()
        .flat_map(|block| block.nodes.iter())
        .flat_map(move |&pos| nodes[pos].ops())
        .flat_map(|op| variables.used_by(op))
        .collect();
    for id in used {
        let variable = &variables.variables()[id];
        out.line(format!("    {} {};  /* {} */", variable.c_type(), variable.name, variable.slot()));
    }
}

fn emit_block(out: &mut Emitter, ctx: &Context<'_>, block: &Block, nodes: &[Node]) {
    out.line(format!("loc_{:x}:", block.start));
    for &pos in &block.nodes {
        let node = &nodes[pos];
        let origin = format!("// 0x{:x}: {}", node.address, node.text);
        if node.statements.is_empty() {
            out.line(format!("    {origin}"));
            continue;
        }
        for (i, statement) in node.statements.iter().enumerate() {
            let line = ctx.statement(statement);
            if i == 0 {
                out.line(format!("    {line}  {origin}"));
            } else {
                out.line(format!("    {line}"));
            }
        }
    }
}

struct Context<'a> {
    labels: &'a HashSet<u64>,
    functions: &'a HashSet<u64>,
    variables: &'a Variables,
}

impl Context<'_> {
    fn statement(&self, statement: &Statement) -> String {
        match statement {
            Statement::Op(op) => self.op(&self.variables.rename(op)),
            Statement::Unparsed(raw) => format!("__unparsed({raw:?});"),
        }
    }

    fn jump(&self, target: &Target) -> String {
        match target {
            Target::Direct(address) if self.labels.contains(address) => {
                format!("goto loc_{address:x};")
            }
            Target::Direct(address) => format!("__jump(0x{address:x});"),
            Target::Indirect(expr) => format!("goto *({expr});"),
        }
    }

    fn op(&self, op: &IrOp) -> String {
        match op {
            IrOp::Assign { dst, src } => format!("{dst} = {src};"),
            IrOp::Binary { dst, lhs, operator, rhs } => {
                format!("{dst} = {lhs} {} {rhs};", operator.symbol())
            }
            IrOp::Unary { dst, operator, src } => format!("{dst} = {}{src};", operator.symbol()),
            IrOp::Compare { lhs, rhs, test: false } => format!("flags = compare({lhs}, {rhs});"),
            IrOp::Compare { lhs, rhs, test: true } => format!("flags = test({lhs}, {rhs});"),
            IrOp::Push { value } => format!("push({value});"),
            IrOp::Pop { dst } => format!("{dst} = pop();"),
            IrOp::Jump { target } => self.jump(target),
            IrOp::CondJump { condition, target } => format!("if ({condition}) {}", self.jump(target)),
            IrOp::Call { target: Target::Direct(address) } if self.functions.contains(address) => {
                format!("sub_{address:x}();")
            }
            IrOp::Call { target: Target::Direct(address) } => format!("__call(0x{address:x});"),
            IrOp::Call { target: Target::Indirect(expr) } => format!("(*({expr}))();"),
            IrOp::Return => "return;".to_string(),
            IrOp::Nop => "/* nop */;".to_string(),
            IrOp::Intrinsic { name, args } => format!("__{name}({});", args.join(", ")),
            IrOp::Unlifted { raw } => format!("__unlifted({raw:?});"),
        }
    }
}

#[derive(Default)]
struct Emitter {
    out: String,
}

impl Emitter {
    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn finish(mut self) -> String {
        while self.out.ends_with("\n\n") {
            self.out.pop();
        }
        self.out
    }
}
