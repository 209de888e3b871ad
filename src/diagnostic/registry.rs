/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,
    pub long: &'static str,
}

/// All stable error codes for the mirza language.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "MZ-L001",
        short: "unterminated string literal",
        long: r#"## MZ-L001: unterminated string literal

A string literal must be closed with `"` on the same line it starts.

**Example:**

    print "hello

**Fix:**

    print "hello"
"#,
    },
    ErrorEntry {
        code: "MZ-L002",
        short: "unknown escape sequence",
        long: r#"## MZ-L002: unknown escape sequence

Inside a string only these escapes are recognised:
`\n \t \a \f \r \v \\ \"`.

**Example:**

    print "C:\temp\q"

`\q` is not an escape. Write `\\q` for a literal backslash.
"#,
    },
    ErrorEntry {
        code: "MZ-L003",
        short: "integer literal out of range",
        long: r#"## MZ-L003: integer literal out of range

Integer literals are at most 64 bits wide. The largest literal is
9223372036854775807.

**Example:**

    var big = 99999999999999999999
"#,
    },
    ErrorEntry {
        code: "MZ-L004",
        short: "unexpected character",
        long: r#"## MZ-L004: unexpected character

A character was found that is not part of the language.

**Example:**

    if !done { print 1 }

Use `not` for logical negation and `!=` for inequality. Strings use
double quotes, never single quotes.
"#,
    },

    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "MZ-P001",
        short: "unexpected token",
        long: r#"## MZ-P001: unexpected token

The parser found a token that cannot appear at this point.

**Example:**

    var = 3

A `var` declaration needs a name: `var x = 3`.
"#,
    },
    ErrorEntry {
        code: "MZ-P002",
        short: "unexpected end of input",
        long: r#"## MZ-P002: unexpected end of input

The program ended in the middle of a statement, usually an unclosed
`{` or a dangling operator.

**Example:**

    if x > 1 { print x
"#,
    },
    ErrorEntry {
        code: "MZ-P003",
        short: "duplicate declaration",
        long: r#"## MZ-P003: duplicate declaration

A name can be declared only once per block. Inner blocks may shadow
outer names.

**Example:**

    var x = 1
    var x = 2

**Fix:** assign instead of declaring again:

    x = 2
"#,
    },
    ErrorEntry {
        code: "MZ-P004",
        short: "undeclared identifier",
        long: r#"## MZ-P004: undeclared identifier

Every variable and function must be declared before it is used.
Functions can see globals and their own locals, but not the locals of
the function that encloses them.

**Example:**

    print total

**Fix:**

    var total = 0
    print total
"#,
    },
    ErrorEntry {
        code: "MZ-P005",
        short: "unknown type name",
        long: r#"## MZ-P005: unknown type name

Known types are `i8 i16 i32 i64 bool str real void`.

**Example:**

    var n: int = 3
"#,
    },
    ErrorEntry {
        code: "MZ-P006",
        short: "variable without a usable type",
        long: r#"## MZ-P006: variable without a usable type

A `var` needs a type annotation, an initializer, or both. Variables and
parameters cannot be `void`.

**Example:**

    var x

**Fix:**

    var x: i32
"#,
    },
    ErrorEntry {
        code: "MZ-P007",
        short: "reserved name",
        long: r#"## MZ-P007: reserved name

Builtin names such as `print`, `sqrt` or `pi` cannot be declared as
variables or functions.

**Example:**

    func sqrt(x: real): real { ret x }
"#,
    },
    ErrorEntry {
        code: "MZ-P008",
        short: "called value is not a function",
        long: r#"## MZ-P008: called value is not a function

Only names declared with `func` (and builtins) can be called.

**Example:**

    var f = 3
    f(1)
"#,
    },
    ErrorEntry {
        code: "MZ-P009",
        short: "too many variables",
        long: r#"## MZ-P009: too many variables

A function, or the global scope, can hold at most 65535 variable slots.
"#,
    },

    // ── Code generation ──────────────────────────────────────────────────────
    ErrorEntry {
        code: "MZ-G001",
        short: "operator applied to incompatible types",
        long: r#"## MZ-G001: operator applied to incompatible types

Arithmetic and comparison need both operands from the same family:
integers (`i8 i16 i32 i64 bool`) or `real`. Bitwise and logical
operators need integers. Strings support no operators.

**Example:**

    print 1 + 2.0

**Fix:**

    print 1.0 + 2.0
"#,
    },
    ErrorEntry {
        code: "MZ-G002",
        short: "value cannot be printed",
        long: r#"## MZ-G002: value cannot be printed

`print` accepts integers, reals and strings. A call to a `void`
function has no value to print.

**Example:**

    func hello() { print "hi" }
    print hello()
"#,
    },
    ErrorEntry {
        code: "MZ-G003",
        short: "builtin rejects argument type",
        long: r#"## MZ-G003: builtin rejects argument type

Each builtin accepts one family of types. Math builtins such as `sqrt`
or `pow` take reals, `abs` takes integers or reals, `slen` takes a
string.

**Example:**

    print sqrt(16)

**Fix:**

    print sqrt(16.0)
"#,
    },
    ErrorEntry {
        code: "MZ-G004",
        short: "wrong number of arguments",
        long: r#"## MZ-G004: wrong number of arguments

A call must pass exactly as many arguments as the function or builtin
declares.

**Example:**

    func add(a: i64, b: i64): i64 { ret a + b }
    print add(1)
"#,
    },
    ErrorEntry {
        code: "MZ-G005",
        short: "argument type mismatch",
        long: r#"## MZ-G005: argument type mismatch

An argument must come from the same family as its parameter. Integers
of any width convert to each other; reals and strings do not.

**Example:**

    func half(x: real): real { ret x / 2.0 }
    print half(3)
"#,
    },
    ErrorEntry {
        code: "MZ-G006",
        short: "assignment type mismatch",
        long: r#"## MZ-G006: assignment type mismatch

The value assigned to a variable must come from the variable's family.
Integer values are cut to the variable's width.

**Example:**

    var s = "text"
    s = 3
"#,
    },
    ErrorEntry {
        code: "MZ-G007",
        short: "return type mismatch",
        long: r#"## MZ-G007: return type mismatch

`ret` must produce a value of the function's declared family, and a
`void` function cannot return a value.

**Example:**

    func f(): i32 { ret "no" }
"#,
    },
    ErrorEntry {
        code: "MZ-G008",
        short: "break or continue outside a loop",
        long: r#"## MZ-G008: break or continue outside a loop

`break` and `continue` only work inside the body of a `for` loop of the
same function.

**Example:**

    if 1 { break }
"#,
    },
    ErrorEntry {
        code: "MZ-G009",
        short: "ret outside a function",
        long: r#"## MZ-G009: ret outside a function

`ret` is only allowed inside a `func` body.

**Example:**

    ret 1
"#,
    },
    ErrorEntry {
        code: "MZ-G010",
        short: "variable read before it has a type",
        long: r#"## MZ-G010: variable read before it has a type

A `var` declared without a type takes the type of its first
initializer. Reading it before then is an error.
"#,
    },
    ErrorEntry {
        code: "MZ-G011",
        short: "function used as a value",
        long: r#"## MZ-G011: function used as a value

Functions can only be called. They cannot be printed, stored or
combined with operators.

**Example:**

    func f() {}
    print f
"#,
    },
    ErrorEntry {
        code: "MZ-G012",
        short: "condition is not an integer",
        long: r#"## MZ-G012: condition is not an integer

`if` and `for` conditions must be integers or bools. Compare reals
explicitly.

**Example:**

    if 1.5 { print 1 }

**Fix:**

    if 1.5 != 0.0 { print 1 }
"#,
    },
    ErrorEntry {
        code: "MZ-G013",
        short: "unresolved jump or call target",
        long: r#"## MZ-G013: unresolved jump or call target

The generator emitted a jump or a call whose target address was never
fixed. This indicates a compiler bug.

If you see this, please file a bug report.
"#,
    },
    ErrorEntry {
        code: "MZ-G014",
        short: "program too large",
        long: r#"## MZ-G014: program too large

Code and data addresses are 16 bits wide, so neither the bytecode nor
the string data may exceed 65536 bytes.
"#,
    },

    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "MZ-R001",
        short: "division by zero",
        long: r#"## MZ-R001: division by zero

An integer `/` or `%` had a zero right operand. Real division by zero
produces infinity or NaN instead.

**Example:**

    var z = 0
    print 1 / z
"#,
    },
    ErrorEntry {
        code: "MZ-R002",
        short: "stack overflow",
        long: r#"## MZ-R002: stack overflow

The operand stack ran out of slots, usually because of unbounded
recursion. The capacity defaults to 2048 slots and can be raised with
`--stack-size`.
"#,
    },
    ErrorEntry {
        code: "MZ-R003",
        short: "step limit reached",
        long: r#"## MZ-R003: step limit reached

The program executed more instructions than `--max-steps` allows.
Without the flag there is no limit.
"#,
    },
    ErrorEntry {
        code: "MZ-R004",
        short: "output error",
        long: r#"## MZ-R004: output error

Writing printed output failed, for example because stdout was closed.
"#,
    },
    ErrorEntry {
        code: "MZ-R005",
        short: "malformed bytecode",
        long: r#"## MZ-R005: malformed bytecode

The machine met an instruction it cannot execute: an unknown opcode,
a truncated operand, a bad slot or string reference, or code that ends
without `halt`. Programs produced by the compiler never do this.

If you see this, please file a bug report.
"#,
    },
];

/// Look up an error entry by code (e.g. `"MZ-G002"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let e = lookup("MZ-G002").expect("MZ-G002 should be in registry");
        assert_eq!(e.code, "MZ-G002");
        assert!(!e.short.is_empty());
        assert!(e.long.contains("MZ-G002"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("MZ-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn long_text_names_its_code() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(
                entry.long.starts_with(&format!("## {}:", entry.code)),
                "{} long text has the wrong heading",
                entry.code
            );
        }
    }

    #[test]
    fn every_phase_is_covered() {
        for prefix in ["MZ-L", "MZ-P", "MZ-G", "MZ-R"] {
            assert!(REGISTRY.iter().any(|e| e.code.starts_with(prefix)), "no {prefix} codes");
        }
        assert_eq!(REGISTRY.len(), 4 + 9 + 14 + 5);
    }
}
