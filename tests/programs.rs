use mirza::codegen::GenError;
use mirza::{Error, VmConfig, VmError, compile_and_run};
use pretty_assertions::assert_eq;

fn run(source: &str) -> String {
    run_with(source, VmConfig::default()).unwrap_or_else(|e| panic!("{e}\nsource:\n{source}"))
}

fn run_with(source: &str, config: VmConfig) -> Result<String, Error> {
    let out = compile_and_run(source, Vec::new(), config)?;
    Ok(String::from_utf8(out).expect("program output is UTF-8"))
}

fn fails(source: &str) -> Error {
    match run_with(source, VmConfig::default()) {
        Ok(out) => panic!("expected an error, program printed {out:?}"),
        Err(e) => e,
    }
}

// --- Arithmetic and printing ---

#[test]
fn precedence() {
    assert_eq!(run("print 2 + 3 * 4"), "14");
    assert_eq!(run("print (2 + 3) * 4"), "20");
    assert_eq!(run("print 10 - 4 - 3"), "3");
    assert_eq!(run("print 1 + 2 == 3 and 4 > 5 or 1"), "1");
}

#[test]
fn modulo_and_division_truncate_toward_zero() {
    let source = "print -10 % 3\nprint \" \"\nprint 10 % -3\nprint \" \"\nprint -7 / 2";
    assert_eq!(run(source), "-1 1 -3");
}

#[test]
fn bitwise_operators() {
    assert_eq!(run("print 5 & 3\nprint 5 | 3\nprint 5 ^ 3"), "176");
}

#[test]
fn logical_operators_yield_zero_or_one() {
    assert_eq!(run("print 7 and 2\nprint 0 or 0\nprint not 5\nprint not 0"), "1001");
}

#[test]
fn i64_arithmetic_wraps() {
    assert_eq!(run("var m = 9223372036854775807\nprint m + 1"), "-9223372036854775808");
}

#[test]
fn reals_print_six_digits() {
    assert_eq!(run("print 1.5 * 2.0"), "3.000000");
    assert_eq!(run("print 7.0 / 2.0"), "3.500000");
    assert_eq!(run("print 2.5 > 1.0"), "1");
}

#[test]
fn strings_and_escapes() {
    assert_eq!(run("print \"tab\\there\\n\""), "tab\there\n");
    assert_eq!(run("var s = \"ok\"\nprint s"), "ok");
}

#[test]
fn unassigned_string_is_empty() {
    assert_eq!(run("print \"hi \"\nvar s: str\nprint s"), "hi ");
    assert_eq!(run("func f() { var s: str\nprint s }\nf()"), "");
}

#[test]
fn print_call_form_prints_each_argument() {
    assert_eq!(run("print(1, 2.5, \"x\")"), "12.500000x");
}

// --- Integer widths ---

#[test]
fn store_into_i8_truncates() {
    let source = "var x: i8\nvar y: i64 = 300\nx = y\nprint x";
    assert_eq!(run(source), "44");
}

#[test]
fn i64_initializer_into_i8_truncates() {
    assert_eq!(run("var a: i64 = 300\nvar b: i8 = a\nprint(b)"), "44");
}

#[test]
fn i16_initializer_wraps() {
    assert_eq!(run("var s: i16 = 100000\nprint s"), "-31072");
}

#[test]
fn narrow_arithmetic_result_is_cut_on_store() {
    assert_eq!(run("var a: i8 = 100\na = a + a\nprint a"), "-56");
}

#[test]
fn operands_widen_before_the_operator() {
    // 100 + 100 does not wrap until it is stored.
    assert_eq!(run("var a: i8 = 100\nprint a + a"), "200");
}

#[test]
fn function_result_narrowed_to_declared_type() {
    assert_eq!(run("func f(): i8 { ret 200 }\nprint f()"), "-56");
}

#[test]
fn i32_parameter_truncates_on_store() {
    let source = "func id(x: i32): i64 { ret x }\nvar big = 4294967297\nprint id(big)";
    // Reading the i32 parameter keeps only its low 32 bits.
    assert_eq!(run(source), "1");
}

// --- Control flow ---

#[test]
fn if_else_chain() {
    let source = "
var n = 15
if n % 15 == 0 { print \"fizzbuzz\" }
else if n % 5 == 0 { print \"buzz\" }
else { print n }
";
    assert_eq!(run(source), "fizzbuzz");
}

#[test]
fn continue_skips_to_post() {
    let source = "
for var i = 0; i < 5; i = i + 1 {
    if i == 2 { continue }
    print i
}
";
    assert_eq!(run(source), "0134");
}

#[test]
fn break_leaves_only_the_inner_loop() {
    let source = "
for var i = 0; i < 3; i = i + 1 {
    for var j = 0; j < 3; j = j + 1 {
        if j == 1 { break }
        print j
    }
    print i
}
";
    assert_eq!(run(source), "000102");
}

#[test]
fn loop_without_post() {
    let source = "
var i = 3
for ; i > 0 ;
{
    print i
    i = i - 1
}
";
    assert_eq!(run(source), "321");
}

#[test]
fn loop_without_body_is_skipped() {
    assert_eq!(run("var i = 0\nfor ; i < 3; i = i + 1\nprint i"), "0");
}

// --- Scopes and functions ---

#[test]
fn inner_block_shadows_outer() {
    let source = "
var x = 10
{
    var x = 20
    print x
}
print x
";
    assert_eq!(run(source), "2010");
}

#[test]
fn recursive_factorial() {
    let source = "
func fact(n: i64): i64 {
    if n <= 1 { ret 1 }
    ret n * fact(n - 1)
}
print fact(5)
";
    assert_eq!(run(source), "120");
}

#[test]
fn recursive_factorial_on_i32() {
    let source = "func fact(n: i32): i32 { if n <= 1 { ret 1 } ret fact(n-1) * n }\nprint fact(5)";
    assert_eq!(run(source), "120");
}

#[test]
fn function_local_shadows_global() {
    assert_eq!(run("var x = 1\nfunc f() { var x = 5\n x = 7 }\nf()\nprint x"), "1");
}

#[test]
fn functions_update_globals() {
    let source = "
var count = 0
func bump() { count = count + 1 }
bump()
bump()
print count
";
    assert_eq!(run(source), "2");
}

#[test]
fn locals_do_not_clobber_caller() {
    let source = "
func sq(x: i64): i64 {
    var y = x * x
    ret y
}
var a = 3
var b = sq(a) + sq(4)
print a
print \" \"
print b
";
    assert_eq!(run(source), "3 25");
}

#[test]
fn void_function_with_early_return() {
    let source = "
func show(n: i64) {
    if n < 0 { ret }
    print n
}
show(-1)
show(7)
";
    assert_eq!(run(source), "7");
}

// --- Builtins ---

#[test]
fn slen_counts_code_points() {
    assert_eq!(run("print slen(\"世界\")"), "2");
    assert_eq!(run("print slen(\"\")"), "0");
    assert_eq!(run("print(slen(\"世界\"))"), "2");
}

#[test]
fn real_math_builtins() {
    assert_eq!(run("print sqrt(pow(3.0, 2.0))"), "3.000000");
    assert_eq!(run("print mod(10.5, 3.0)"), "1.500000");
    assert_eq!(run("print floor(2.7) + ceil(0.2)"), "3.000000");
    assert_eq!(run("print pi()"), "3.141593");
    assert_eq!(run("print(sqrt(pow(3.0, 2.0)))"), "3.000000");
}

#[test]
fn abs_follows_its_argument_family() {
    assert_eq!(run("print abs(-42)"), "42");
    assert_eq!(run("print abs(-2.5)"), "2.500000");
}

// --- Errors ---

#[test]
fn integer_division_by_zero_is_a_runtime_error() {
    let err = fails("var z = 0\nprint 10 / z");
    assert!(matches!(err, Error::Vm(VmError::DivisionByZero { .. })), "{err:?}");
}

#[test]
fn output_before_runtime_error_is_kept() {
    let mut out = Vec::new();
    let program = mirza::compile("print 1\nvar z = 0\nprint 1 % z").unwrap();
    let mut vm = mirza::vm::Vm::new(&program, &mut out);
    assert!(vm.run().is_err());
    drop(vm);
    assert_eq!(out, b"1");
}

#[test]
fn runaway_recursion_overflows_the_stack() {
    let source = "func f(n: i64): i64 { ret f(n + 1) }\nprint f(0)";
    let config = VmConfig { stack_size: 64, ..VmConfig::default() };
    let err = run_with(source, config).unwrap_err();
    assert!(matches!(err, Error::Vm(VmError::StackOverflow { capacity: 64 })), "{err:?}");
}

#[test]
fn mixed_families_are_rejected() {
    assert!(matches!(fails("print 1 + 2.0"), Error::Gen(GenError::BinaryType { .. })));
    assert!(matches!(fails("print \"a\" + 1"), Error::Gen(GenError::BinaryType { .. })));
    assert!(matches!(fails("print sqrt(16)"), Error::Gen(GenError::BuiltinArgType { .. })));
}

#[test]
fn assignment_across_families_is_rejected() {
    let err = fails("var s = \"text\"\ns = 3");
    assert!(matches!(err, Error::Gen(GenError::AssignType { .. })), "{err:?}");
}

#[test]
fn misplaced_control_flow_is_rejected() {
    assert!(matches!(fails("break"), Error::Gen(GenError::BreakOutsideLoop { .. })));
    assert!(matches!(fails("continue"), Error::Gen(GenError::ContinueOutsideLoop { .. })));
    assert!(matches!(fails("ret 1"), Error::Gen(GenError::ReturnOutsideFunction { .. })));
}

#[test]
fn wrong_argument_count() {
    let err = fails("func add(a: i64, b: i64): i64 { ret a + b }\nprint add(1)");
    assert!(matches!(err, Error::Gen(GenError::Arity { expected: 2, found: 1, .. })), "{err:?}");
}

#[test]
fn front_end_errors_surface_through_the_pipeline() {
    assert!(matches!(fails("print \"open"), Error::Lex(_)));
    assert!(matches!(fails("print nope"), Error::Parse(_)));
}
