//! Arithmetic and relational semantics of compiled methods, executed in the
//! simulator against the reference runtime.

use arithjit::config::{Capabilities, JitConfig};
use arithjit::jit::{CompiledMethod, RunOutcome, Simulator, compile};
use arithjit::vm::{
    CodeBlock, Constant, CounterKind, GenericRuntime, Instruction, OperandTypes, RuntimeBridge,
    RuntimeOp, TypeHint, Value, VirtualRegister,
};

fn r(n: u32) -> VirtualRegister {
    VirtualRegister::slot(n)
}

type Make = fn(VirtualRegister, VirtualRegister, VirtualRegister) -> Instruction;

fn config() -> JitConfig {
    JitConfig {
        capabilities: Capabilities {
            integer_divide: true,
            fp_truncate: true,
            floating_point: true,
        },
        ..JitConfig::default()
    }
}

struct Run {
    frame: Vec<Value>,
    outcome: RunOutcome,
    method: CompiledMethod,
}

impl Run {
    fn calls(&self) -> Vec<RuntimeOp> {
        self.outcome.calls.iter().map(|c| c.op).collect()
    }

    fn slow_cases(&self, offset: u32) -> u32 {
        self.method.profile.count(CounterKind::SlowCase, offset)
    }

    fn special(&self, offset: u32) -> u32 {
        self.method.profile.count(CounterKind::Special, offset)
    }
}

fn run_block(block: &CodeBlock, config: &JitConfig, inputs: &[Value], runtime: &mut GenericRuntime) -> Run {
    let method = compile(block, config).unwrap();
    let mut frame = vec![Value::UNDEFINED; block.num_slots];
    frame[..inputs.len()].copy_from_slice(inputs);
    let outcome = Simulator::new(&method).run(&mut frame, runtime).unwrap();
    Run {
        frame,
        outcome,
        method,
    }
}

/// Run `dst = lhs op rhs` over slots 0, 1 and 2.
fn binary_with(make: Make, config: &JitConfig, lhs: Value, rhs: Value) -> Run {
    let mut block = CodeBlock::new("binary", 3);
    block.push(make(r(2), r(0), r(1)));
    run_block(&block, config, &[lhs, rhs], &mut GenericRuntime::new())
}

fn binary(make: Make, lhs: Value, rhs: Value) -> Run {
    binary_with(make, &config(), lhs, rhs)
}

/// Run `dst = lhs op k` with a constant right operand.
fn with_constant(make: Make, lhs: Value, constant: Constant) -> Run {
    let mut block = CodeBlock::new("constant", 2);
    let k = block.add_constant(constant);
    block.push(make(r(1), r(0), k));
    run_block(&block, &config(), &[lhs], &mut GenericRuntime::new())
}

fn add(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Add {
        dst,
        lhs,
        rhs,
        types: OperandTypes::default(),
    }
}

fn sub(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Sub {
        dst,
        lhs,
        rhs,
        types: OperandTypes::default(),
    }
}

fn mul(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Mul {
        dst,
        lhs,
        rhs,
        types: OperandTypes::default(),
    }
}

fn div(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Div {
        dst,
        lhs,
        rhs,
        types: OperandTypes::default(),
    }
}

fn modulo(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Mod { dst, lhs, rhs }
}

fn bitand(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Bitand { dst, lhs, rhs }
}

fn lshift(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Lshift { dst, lhs, rhs }
}

fn rshift(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Rshift { dst, lhs, rhs }
}

fn urshift(dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) -> Instruction {
    Instruction::Urshift { dst, lhs, rhs }
}

fn int(n: i32) -> Value {
    Value::int32(n)
}

fn double(d: f64) -> Value {
    Value::double(d)
}

// ==================== Add, sub, mul ====================

#[test]
fn test_int_arithmetic_stays_fast() {
    let cases: [(Make, i32, i32, i32); 4] = [
        (add, 2, 40, 42),
        (sub, 2, 40, -38),
        (mul, 6, 7, 42),
        (mul, -6, 7, -42),
    ];
    for (make, a, b, expected) in cases {
        let run = binary(make, int(a), int(b));
        assert_eq!(run.frame[2], int(expected));
        assert!(run.outcome.calls.is_empty());
        assert_eq!(run.slow_cases(0), 0);
    }
}

#[test]
fn test_overflow_reaches_runtime() {
    let run = binary(add, int(i32::MAX), int(1));
    assert_eq!(run.frame[2], double(2147483648.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Add]);
    assert_eq!(run.slow_cases(0), 1);

    let run = binary(sub, int(i32::MIN), int(1));
    assert_eq!(run.frame[2], double(-2147483649.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Sub]);

    let run = binary(mul, int(65536), int(65536));
    assert_eq!(run.frame[2], double(4294967296.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Mul]);
}

#[test]
fn test_negative_zero_product() {
    let run = binary(mul, int(0), int(-5));
    assert_eq!(run.frame[2], double(-0.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Mul]);
    assert_eq!(run.special(0), 1);
    assert_eq!(run.slow_cases(0), 1);

    // A zero product of non-negative factors is a plain int.
    let run = binary(mul, int(0), int(5));
    assert_eq!(run.frame[2], int(0));
    assert!(run.outcome.calls.is_empty());
    assert_eq!(run.special(0), 0);
}

#[test]
fn test_zero_product_without_profiling_checks_sign() {
    let config = JitConfig {
        emit_profiling: false,
        ..config()
    };
    let run = binary_with(mul, &config, int(0), int(5));
    assert_eq!(run.frame[2], int(0));
    assert!(run.outcome.calls.is_empty());

    let run = binary_with(mul, &config, int(-5), int(0));
    assert_eq!(run.frame[2], double(-0.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Mul]);
    assert_eq!(run.special(0), 0);
    assert_eq!(run.slow_cases(0), 0);
}

#[test]
fn test_double_retry_keeps_doubles() {
    let run = binary(add, double(1.5), double(1.5));
    assert_eq!(run.frame[2], double(3.0));
    assert!(run.outcome.calls.is_empty());
    assert_eq!(run.slow_cases(0), 1);

    let run = binary(add, int(1), double(0.5));
    assert_eq!(run.frame[2], double(1.5));
    assert!(run.outcome.calls.is_empty());

    let run = binary(sub, double(0.5), int(2));
    assert_eq!(run.frame[2], double(-1.5));
    assert!(run.outcome.calls.is_empty());

    let run = binary(mul, double(2.5), int(4));
    assert_eq!(run.frame[2], double(10.0));
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_double_retry_with_constant() {
    let run = with_constant(add, double(0.25), Constant::Int(1));
    assert_eq!(run.frame[1], double(1.25));
    assert!(run.outcome.calls.is_empty());

    let mut block = CodeBlock::new("rsub", 2);
    let k = block.add_constant(Constant::Int(10));
    block.push(sub(r(1), k, r(0)));
    let run = run_block(&block, &config(), &[double(0.5)], &mut GenericRuntime::new());
    assert_eq!(run.frame[1], double(9.5));
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_without_floating_point_doubles_go_to_runtime() {
    let mut config = config();
    config.capabilities.floating_point = false;
    let run = binary_with(add, &config, double(1.5), double(1.5));
    assert_eq!(run.frame[2], int(3));
    assert_eq!(run.calls(), vec![RuntimeOp::Add]);
}

#[test]
fn test_constant_operands() {
    let run = with_constant(add, int(41), Constant::Int(1));
    assert_eq!(run.frame[1], int(42));
    assert!(run.outcome.calls.is_empty());

    let mut block = CodeBlock::new("rsub", 2);
    let k = block.add_constant(Constant::Int(10));
    block.push(sub(r(1), k, r(0)));
    let run = run_block(&block, &config(), &[int(3)], &mut GenericRuntime::new());
    assert_eq!(run.frame[1], int(7));

    let run = with_constant(add, int(i32::MAX), Constant::Int(1));
    assert_eq!(run.frame[1], double(2147483648.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Add]);
}

#[test]
fn test_string_concatenation() {
    let mut runtime = GenericRuntime::new();
    let a = runtime.heap_mut().alloc_string("a");
    let mut block = CodeBlock::new("concat", 3);
    block.push(add(r(2), r(0), r(1)));
    let run = run_block(&block, &config(), &[a, int(1)], &mut runtime);
    assert_eq!(run.calls(), vec![RuntimeOp::Add]);
    assert_eq!(runtime.heap().string_text(run.frame[2]).as_deref(), Some("a1"));
}

#[test]
fn test_non_number_hint_calls_runtime_directly() {
    let mut block = CodeBlock::new("generic", 3);
    block.push(Instruction::Add {
        dst: r(2),
        lhs: r(0),
        rhs: r(1),
        types: OperandTypes::new(TypeHint::NonNumber, TypeHint::Unknown),
    });
    let run = run_block(&block, &config(), &[int(1), int(2)], &mut GenericRuntime::new());
    assert_eq!(run.frame[2], int(3));
    assert_eq!(run.calls(), vec![RuntimeOp::Add]);
    assert_eq!(run.slow_cases(0), 0);
}

// ==================== Division ====================

#[test]
fn test_division_retags_exact_quotients() {
    let run = binary(div, int(10), int(2));
    assert_eq!(run.frame[2], int(5));
    assert!(run.outcome.calls.is_empty());
    assert_eq!(run.special(0), 0);

    let run = binary(div, int(0), int(5));
    assert_eq!(run.frame[2], int(0));
    assert_eq!(run.special(0), 0);
}

#[test]
fn test_division_keeps_inexact_quotients() {
    let run = binary(div, int(0), int(-4));
    assert_eq!(run.frame[2], double(-0.0));
    assert_eq!(run.special(0), 1);

    let run = binary(div, int(7), int(2));
    assert_eq!(run.frame[2], double(3.5));
    assert_eq!(run.special(0), 1);

    let run = binary(div, int(1), int(0));
    assert_eq!(run.frame[2], double(f64::INFINITY));
    assert!(run.outcome.calls.is_empty());

    let run = binary(div, double(3.0), double(1.5));
    assert_eq!(run.frame[2], int(2));
}

#[test]
fn test_division_by_constants() {
    let run = with_constant(div, int(1), Constant::Double(0.5));
    assert_eq!(run.frame[1], int(2));

    let run = with_constant(div, int(9), Constant::Int(3));
    assert_eq!(run.frame[1], int(3));
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_division_of_non_numbers_reaches_runtime() {
    let run = binary(div, Value::NULL, int(2));
    assert_eq!(run.frame[2], int(0));
    assert_eq!(run.calls(), vec![RuntimeOp::Div]);
    assert_eq!(run.slow_cases(0), 1);
}

#[test]
fn test_number_hints_still_check_operands() {
    let hinted = OperandTypes::new(TypeHint::Number, TypeHint::Number);
    let mut block = CodeBlock::new("hinted", 4);
    block.push(Instruction::Div {
        dst: r(2),
        lhs: r(0),
        rhs: r(1),
        types: hinted,
    });
    block.push(Instruction::Add {
        dst: r(3),
        lhs: r(0),
        rhs: r(1),
        types: hinted,
    });

    let run = run_block(&block, &config(), &[Value::UNDEFINED, int(2)], &mut GenericRuntime::new());
    assert!(run.frame[2].as_number().is_some_and(f64::is_nan));
    assert!(run.frame[3].as_number().is_some_and(f64::is_nan));
    assert_eq!(run.calls(), vec![RuntimeOp::Div, RuntimeOp::Add]);

    let run = run_block(&block, &config(), &[Value::NULL, int(2)], &mut GenericRuntime::new());
    assert_eq!(run.frame[2], int(0));
    assert_eq!(run.frame[3], int(2));
    assert_eq!(run.calls(), vec![RuntimeOp::Div, RuntimeOp::Add]);
    assert_eq!(run.slow_cases(0), 1);

    let run = run_block(&block, &config(), &[double(5.0), int(2)], &mut GenericRuntime::new());
    assert_eq!(run.frame[2], double(2.5));
    assert_eq!(run.frame[3], double(7.0));
    assert!(run.outcome.calls.is_empty());
}

// ==================== Remainder ====================

#[test]
fn test_modulo() {
    let run = binary(modulo, int(7), int(3));
    assert_eq!(run.frame[2], int(1));
    assert!(run.outcome.calls.is_empty());

    let run = binary(modulo, int(-7), int(3));
    assert_eq!(run.frame[2], int(-1));
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_modulo_edge_cases_reach_runtime() {
    let run = binary(modulo, int(5), int(0));
    assert!(run.frame[2].as_double().unwrap().is_nan());
    assert_eq!(run.calls(), vec![RuntimeOp::Mod]);

    let run = binary(modulo, int(i32::MIN), int(-1));
    assert_eq!(run.frame[2], double(-0.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Mod]);

    let run = binary(modulo, int(-7), int(7));
    assert_eq!(run.frame[2], double(-0.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Mod]);
    assert_eq!(run.slow_cases(0), 1);
}

#[test]
fn test_modulo_without_integer_divide() {
    let mut config = config();
    config.capabilities.integer_divide = false;
    let run = binary_with(modulo, &config, int(7), int(3));
    assert_eq!(run.frame[2], int(1));
    assert_eq!(run.calls(), vec![RuntimeOp::Mod]);
    assert_eq!(run.method.slow_case_count(), 0);
}

// ==================== Unary ====================

#[test]
fn test_negate() {
    let mut block = CodeBlock::new("negate", 2);
    block.push(Instruction::Negate { dst: r(1), src: r(0) });
    let negate = |input: Value| run_block(&block, &config(), &[input], &mut GenericRuntime::new());

    let run = negate(int(5));
    assert_eq!(run.frame[1], int(-5));
    assert!(run.outcome.calls.is_empty());

    let run = negate(double(2.5));
    assert_eq!(run.frame[1], double(-2.5));
    assert!(run.outcome.calls.is_empty());

    let run = negate(int(0));
    assert_eq!(run.frame[1], double(-0.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Negate]);

    let run = negate(int(i32::MIN));
    assert_eq!(run.frame[1], double(2147483648.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Negate]);
    assert_eq!(run.outcome.calls[0].rhs, Value::UNDEFINED);
}

#[test]
fn test_inc_dec() {
    let mut block = CodeBlock::new("inc", 1);
    block.push(Instruction::Inc { srcdst: r(0) });
    let run = run_block(&block, &config(), &[int(41)], &mut GenericRuntime::new());
    assert_eq!(run.frame[0], int(42));

    let run = run_block(&block, &config(), &[int(i32::MAX)], &mut GenericRuntime::new());
    assert_eq!(run.frame[0], double(2147483648.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Inc]);

    let mut block = CodeBlock::new("dec", 1);
    block.push(Instruction::Dec { srcdst: r(0) });
    let run = run_block(&block, &config(), &[int(0)], &mut GenericRuntime::new());
    assert_eq!(run.frame[0], int(-1));

    let run = run_block(&block, &config(), &[double(0.5)], &mut GenericRuntime::new());
    assert_eq!(run.frame[0], double(-0.5));
    assert_eq!(run.calls(), vec![RuntimeOp::Dec]);
}

#[test]
fn test_unsigned() {
    let mut block = CodeBlock::new("unsigned", 2);
    block.push(Instruction::Unsigned { dst: r(1), src: r(0) });
    let run = run_block(&block, &config(), &[int(7)], &mut GenericRuntime::new());
    assert_eq!(run.frame[1], int(7));

    let run = run_block(&block, &config(), &[int(-1)], &mut GenericRuntime::new());
    assert_eq!(run.frame[1], double(4294967295.0));
    assert_eq!(run.calls(), vec![RuntimeOp::Unsigned]);
}

// ==================== Bitwise ====================

#[test]
fn test_constant_shift_amounts_are_masked() {
    let run = with_constant(lshift, int(3), Constant::Int(33));
    assert_eq!(run.frame[1], int(6));
    assert!(run.outcome.calls.is_empty());

    let run = with_constant(rshift, int(-8), Constant::Int(1));
    assert_eq!(run.frame[1], int(-4));

    let run = with_constant(urshift, int(-1), Constant::Int(28));
    assert_eq!(run.frame[1], int(15));
}

#[test]
fn test_register_shifts() {
    let run = binary(rshift, int(-16), int(2));
    assert_eq!(run.frame[2], int(-4));
    assert!(run.outcome.calls.is_empty());

    let run = binary(lshift, int(1), int(35));
    assert_eq!(run.frame[2], int(8));
}

#[test]
fn test_shift_truncates_double_left_operand() {
    let run = binary(lshift, double(2.7), int(1));
    assert_eq!(run.frame[2], int(4));
    assert!(run.outcome.calls.is_empty());

    // Out of int32 range: the runtime applies modular conversion.
    let run = binary(lshift, double(1e10), int(1));
    assert_eq!(run.frame[2], int(1410065408i32.wrapping_shl(1)));
    assert_eq!(run.calls(), vec![RuntimeOp::LShift]);

    let mut config = config();
    config.capabilities.fp_truncate = false;
    let run = binary_with(lshift, &config, double(2.7), int(1));
    assert_eq!(run.frame[2], int(4));
    assert_eq!(run.calls(), vec![RuntimeOp::LShift]);
}

#[test]
fn test_bitand() {
    let run = binary(bitand, int(12), int(10));
    assert_eq!(run.frame[2], int(8));
    assert!(run.outcome.calls.is_empty());

    let run = with_constant(bitand, int(5), Constant::Int(-1));
    assert_eq!(run.frame[1], int(5));

    let run = with_constant(bitand, int(-5), Constant::Int(3));
    assert_eq!(run.frame[1], int(3));

    let run = binary(bitand, double(5.5), int(3));
    assert_eq!(run.frame[2], int(1));
    assert_eq!(run.calls(), vec![RuntimeOp::BitAnd]);
}

// ==================== Relational jumps ====================

type Jump = fn(VirtualRegister, VirtualRegister, u32) -> Instruction;

const JUMPS: [(&str, Jump); 8] = [
    ("jless", |lhs, rhs, target| Instruction::Jless { lhs, rhs, target }),
    ("jlesseq", |lhs, rhs, target| Instruction::Jlesseq { lhs, rhs, target }),
    ("jgreater", |lhs, rhs, target| Instruction::Jgreater { lhs, rhs, target }),
    ("jgreatereq", |lhs, rhs, target| Instruction::Jgreatereq { lhs, rhs, target }),
    ("jnless", |lhs, rhs, target| Instruction::Jnless { lhs, rhs, target }),
    ("jnlesseq", |lhs, rhs, target| Instruction::Jnlesseq { lhs, rhs, target }),
    ("jngreater", |lhs, rhs, target| Instruction::Jngreater { lhs, rhs, target }),
    ("jngreatereq", |lhs, rhs, target| Instruction::Jngreatereq { lhs, rhs, target }),
];

fn expected_taken(name: &str, a: f64, b: f64) -> bool {
    match name {
        "jless" => a < b,
        "jlesseq" => a <= b,
        "jgreater" => a > b,
        "jgreatereq" => a >= b,
        "jnless" => !(a < b),
        "jnlesseq" => !(a <= b),
        "jngreater" => !(a > b),
        "jngreatereq" => !(a >= b),
        _ => unreachable!(),
    }
}

/// Slot 2 counts fall-throughs: the jump skips the `inc` when taken.
fn branch_block(jump: Jump, lhs: VirtualRegister, rhs: VirtualRegister) -> CodeBlock {
    let mut block = CodeBlock::new("branch", 3);
    block.push(jump(lhs, rhs, 2));
    block.push(Instruction::Inc { srcdst: r(2) });
    block
}

fn taken_with(block: &CodeBlock, config: &JitConfig, inputs: &[Value], runtime: &mut GenericRuntime) -> (bool, Run) {
    let mut frame = inputs.to_vec();
    frame.resize(2, Value::UNDEFINED);
    frame.push(int(0));
    let run = run_block(block, config, &frame, runtime);
    (run.frame[2] == int(0), run)
}

fn taken(jump: Jump, a: Value, b: Value) -> (bool, Run) {
    let block = branch_block(jump, r(0), r(1));
    taken_with(&block, &config(), &[a, b], &mut GenericRuntime::new())
}

#[test]
fn test_int_jumps() {
    for (name, jump) in JUMPS {
        for (a, b) in [(1, 2), (2, 1), (2, 2), (-3, 3)] {
            let (was_taken, run) = taken(jump, int(a), int(b));
            assert_eq!(was_taken, expected_taken(name, a as f64, b as f64), "{} {} {}", name, a, b);
            assert!(run.outcome.calls.is_empty());
        }
    }
}

#[test]
fn test_double_jumps_retry_without_runtime() {
    for (name, jump) in JUMPS {
        for (a, b) in [(1.5, 2.0), (2.0, 1.5), (0.5, 0.5), (f64::NAN, 1.0), (1.0, f64::NAN)] {
            let (was_taken, run) = taken(jump, double(a), double(b));
            assert_eq!(was_taken, expected_taken(name, a, b), "{} {} {}", name, a, b);
            assert!(run.outcome.calls.is_empty(), "{} {} {}", name, a, b);
            assert_eq!(run.slow_cases(0), 1);
        }
    }
}

#[test]
fn test_mixed_jumps() {
    for (name, jump) in JUMPS {
        let (was_taken, run) = taken(jump, int(1), double(1.5));
        assert_eq!(was_taken, expected_taken(name, 1.0, 1.5), "{}", name);
        assert!(run.outcome.calls.is_empty(), "{}", name);
        assert_eq!(run.slow_cases(0), 1);
        let (was_taken, run) = taken(jump, double(2.5), int(2));
        assert_eq!(was_taken, expected_taken(name, 2.5, 2.0), "{}", name);
        assert!(run.outcome.calls.is_empty(), "{}", name);
        let (was_taken, run) = taken(jump, double(f64::NAN), int(0));
        assert_eq!(was_taken, expected_taken(name, f64::NAN, 0.0), "{}", name);
        assert!(run.outcome.calls.is_empty(), "{}", name);
    }

    // A non-number on either side still reaches the runtime.
    let (_, run) = taken(JUMPS[0].1, int(1), Value::NULL);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);
    let (_, run) = taken(JUMPS[0].1, double(1.5), Value::TRUE);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);
}

#[test]
fn test_negated_jumps_branch_oppositely() {
    let mut runtime = GenericRuntime::new();
    let s = runtime.heap_mut().alloc_string("b");
    let inputs = [
        (int(1), int(2)),
        (double(1.5), int(1)),
        (double(f64::NAN), double(0.0)),
        (Value::NULL, int(0)),
        (s, int(1)),
    ];
    let pairs = [(JUMPS[0].1, JUMPS[4].1), (JUMPS[1].1, JUMPS[5].1), (JUMPS[2].1, JUMPS[6].1), (JUMPS[3].1, JUMPS[7].1)];
    for (plain, negated) in pairs {
        for (a, b) in inputs {
            let (x, _) = taken_with(&branch_block(plain, r(0), r(1)), &config(), &[a, b], &mut runtime);
            let (y, _) = taken_with(&branch_block(negated, r(0), r(1)), &config(), &[a, b], &mut runtime);
            assert_ne!(x, y, "{} {}", a, b);
        }
    }
}

#[test]
fn test_jump_against_int_constant() {
    let mut block = CodeBlock::new("const", 3);
    let k = block.add_constant(Constant::Int(1));
    block.push(Instruction::Jless { lhs: r(0), rhs: k, target: 2 });
    block.push(Instruction::Inc { srcdst: r(2) });

    let (was_taken, run) = taken_with(&block, &config(), &[int(0)], &mut GenericRuntime::new());
    assert!(was_taken);
    assert!(run.outcome.calls.is_empty());

    let (was_taken, run) = taken_with(&block, &config(), &[double(0.5)], &mut GenericRuntime::new());
    assert!(was_taken);
    assert!(run.outcome.calls.is_empty());

    let (was_taken, run) = taken_with(&block, &config(), &[Value::TRUE], &mut GenericRuntime::new());
    assert!(!was_taken);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);

    let mut block = CodeBlock::new("const-left", 3);
    let k = block.add_constant(Constant::Int(1));
    block.push(Instruction::Jless { lhs: k, rhs: r(0), target: 2 });
    block.push(Instruction::Inc { srcdst: r(2) });
    let (was_taken, run) = taken_with(&block, &config(), &[double(1.5)], &mut GenericRuntime::new());
    assert!(was_taken);
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_jump_without_floating_point_calls_runtime() {
    let mut config = config();
    config.capabilities.floating_point = false;
    let block = branch_block(JUMPS[0].1, r(0), r(1));
    let (was_taken, run) = taken_with(&block, &config, &[double(1.5), int(2)], &mut GenericRuntime::new());
    assert!(was_taken);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);
    assert_eq!(run.slow_cases(0), 1);
}

#[test]
fn test_single_character_compare() {
    let mut runtime = GenericRuntime::new();
    let b = runtime.heap_mut().alloc_string("b");
    let a = runtime.heap_mut().alloc_string("a");
    let ab = runtime.heap_mut().alloc_string("ab");

    let mut block = CodeBlock::new("char", 3);
    let k = block.add_constant(Constant::String {
        cell: b,
        text: "b".to_string(),
    });
    block.push(Instruction::Jless { lhs: r(0), rhs: k, target: 2 });
    block.push(Instruction::Inc { srcdst: r(2) });

    let (was_taken, run) = taken_with(&block, &config(), &[a], &mut runtime);
    assert!(was_taken);
    assert!(run.outcome.calls.is_empty());

    let (was_taken, run) = taken_with(&block, &config(), &[ab], &mut runtime);
    assert!(was_taken);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);

    let (was_taken, run) = taken_with(&block, &config(), &[int(5)], &mut runtime);
    assert!(!was_taken);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);

    // Constant on the left: "b" < "a" is false.
    let mut block = CodeBlock::new("char-left", 3);
    let k = block.add_constant(Constant::String {
        cell: b,
        text: "b".to_string(),
    });
    block.push(Instruction::Jless { lhs: k, rhs: r(0), target: 2 });
    block.push(Instruction::Inc { srcdst: r(2) });
    let (was_taken, run) = taken_with(&block, &config(), &[a], &mut runtime);
    assert!(!was_taken);
    assert!(run.outcome.calls.is_empty());
}

#[test]
fn test_rope_goes_to_runtime() {
    let mut runtime = GenericRuntime::new();
    let empty = runtime.heap_mut().alloc_string("");
    let a = runtime.heap_mut().alloc_string("a");
    let rope = runtime.heap_mut().alloc_rope(empty, a).unwrap();
    let b = runtime.heap_mut().alloc_string("b");

    let mut block = CodeBlock::new("rope", 3);
    let k = block.add_constant(Constant::String {
        cell: b,
        text: "b".to_string(),
    });
    block.push(Instruction::Jless { lhs: r(0), rhs: k, target: 2 });
    block.push(Instruction::Inc { srcdst: r(2) });
    let (was_taken, run) = taken_with(&block, &config(), &[rope], &mut runtime);
    assert!(was_taken);
    assert_eq!(run.calls(), vec![RuntimeOp::CompareLess]);
}

#[test]
fn test_backward_loop() {
    // r0 = 0; do { r0++ } while (r0 < 10)
    let mut block = CodeBlock::new("loop", 2);
    let k = block.add_constant(Constant::Int(10));
    block.push(Instruction::Inc { srcdst: r(0) });
    block.push(Instruction::Jless { lhs: r(0), rhs: k, target: 0 });
    let run = run_block(&block, &config(), &[int(0)], &mut GenericRuntime::new());
    assert_eq!(run.frame[0], int(10));
    assert!(run.outcome.calls.is_empty());
}
