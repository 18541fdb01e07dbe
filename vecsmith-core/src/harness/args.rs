//! Per-function `arg_info` setup and helper fallbacks.

/// How `func_args->arg_info` is populated for a benchmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSetup {
    /// `arg_info = NULL`.
    Null,
    /// `int` argument.
    Int(i64),
    /// `struct { int a; int b; }`.
    IntPair(i64, i64),
    /// `struct { real_t a; real_t b; }` initialised from the scalars `init()` produces.
    InitScalarPair,
    /// Pointer to the first `init()` scalar.
    InitScalarRef,
}

/// Fixed argument table. Every other function runs with `arg_info = NULL`.
pub fn arg_setup_for(function: &str) -> ArgSetup {
    match function {
        "s242" => ArgSetup::InitScalarPair,
        "s318" | "s162" | "s171" | "s175" => ArgSetup::Int(1),
        "s174" => ArgSetup::Int(10),
        "s332" => ArgSetup::InitScalarRef,
        "s122" => ArgSetup::IntPair(1, 2),
        "s172" => ArgSetup::IntPair(1, 1),
        _ => ArgSetup::Null,
    }
}

impl ArgSetup {
    /// C statements for `main`, after `init(&ip, &s1, &s2)` has run.
    pub fn render(&self, function: &str) -> String {
        let target = match self {
            ArgSetup::Null => return assign("NULL"),
            ArgSetup::Int(value) => {
                let var = format!("{}_arg", function);
                return format!("    int {} = {};\n{}", var, value, assign(&format!("&{}", var)));
            }
            ArgSetup::IntPair(a, b) => {
                format!("    struct {{ int a; int b; }} {}_args = {{ {}, {} }};", function, a, b)
            }
            ArgSetup::InitScalarPair => {
                format!("    struct {{ real_t a; real_t b; }} {}_args = {{ s1, s2 }};", function)
            }
            ArgSetup::InitScalarRef => return assign("&s1"),
        };
        format!("{}\n{}", target, assign(&format!("&{}_args", function)))
    }
}

fn assign(value: &str) -> String {
    format!(
        "    func_args_orig.arg_info = {value};\n    func_args_vec.arg_info = {value};"
    )
}

const TEST_HELPER: &str = "real_t test(real_t* A){
  real_t s = (real_t)0.0;
  for (int i = 0; i < 4; i++)
    s += A[i];
  return s;
}";

/// Helper definitions used when the reference source does not carry them.
pub fn fallback_helper(name: &str) -> Option<&'static str> {
    match name {
        "test" => Some(TEST_HELPER),
        _ => None,
    }
}
