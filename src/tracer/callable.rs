//! Capability Capture
//!
//! Tracing callables whose signature is only known at the call site. Rust
//! has no runtime reflection, so typed adapters stand in for it: any
//! `Fn(A1..An) -> R` (n <= 6) becomes a [`Callable`] that can validate a
//! type-erased argument list, invoke the function with it and hand back the
//! results as an ordered, type-erased sequence.
//!
//! ```
//! use pulsetrace::args;
//! use pulsetrace::tracer::{callable, Callable};
//!
//! let add = callable(|a: i32, b: i32| a + b);
//! let results = add.invoke(args![3, 4]).unwrap();
//! assert_eq!(results[0].downcast_ref::<i32>(), Some(&7));
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};

// =============================================================================
// Value
// =============================================================================

/// A type-erased value that remembers the name of its concrete type.
pub struct Value {
    inner: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Concrete type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Take the concrete value out, or get the `Value` back on mismatch
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Value> {
        let type_name = self.type_name;
        match self.inner.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Value { inner, type_name }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.type_name)
    }
}

/// Build a `Vec<Value>` argument list.
///
/// ```
/// let args = pulsetrace::args!["hello", 42u32];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::tracer::Value::new($value)),*]
    };
}

// =============================================================================
// Results
// =============================================================================

/// Conversion of a function's return value into an ordered result list.
///
/// `()` yields no results, a tuple yields one result per element, and any
/// other supported type yields a single result.
pub trait IntoResults {
    fn result_types() -> Vec<&'static str>;
    fn into_results(self) -> Vec<Value>;
}

impl IntoResults for () {
    fn result_types() -> Vec<&'static str> {
        Vec::new()
    }

    fn into_results(self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! tuple_results {
    ($($name:ident),+) => {
        impl<$($name: Any + Send),+> IntoResults for ($($name,)+) {
            fn result_types() -> Vec<&'static str> {
                vec![$(type_name::<$name>()),+]
            }

            #[allow(non_snake_case)]
            fn into_results(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$(Value::new($name)),+]
            }
        }
    };
}

tuple_results!(A);
tuple_results!(A, B);
tuple_results!(A, B, C);
tuple_results!(A, B, C, D);
tuple_results!(A, B, C, D, E);
tuple_results!(A, B, C, D, E, G);

macro_rules! single_results {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoResults for $ty {
                fn result_types() -> Vec<&'static str> {
                    vec![type_name::<$ty>()]
                }

                fn into_results(self) -> Vec<Value> {
                    vec![Value::new(self)]
                }
            }
        )*
    };
}

single_results!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: Any + Send> IntoResults for Vec<T> {
    fn result_types() -> Vec<&'static str> {
        vec![type_name::<Vec<T>>()]
    }

    fn into_results(self) -> Vec<Value> {
        vec![Value::new(self)]
    }
}

impl<T: Any + Send> IntoResults for Option<T> {
    fn result_types() -> Vec<&'static str> {
        vec![type_name::<Option<T>>()]
    }

    fn into_results(self) -> Vec<Value> {
        vec![Value::new(self)]
    }
}

impl<T: Any + Send, E: Any + Send> IntoResults for std::result::Result<T, E> {
    fn result_types() -> Vec<&'static str> {
        vec![type_name::<std::result::Result<T, E>>()]
    }

    fn into_results(self) -> Vec<Value> {
        vec![Value::new(self)]
    }
}

// =============================================================================
// Callable
// =============================================================================

/// Capability contract over a callable of arbitrary signature.
pub trait Callable {
    /// Derived identity: the callable's path plus its signature
    fn identity(&self) -> String;

    /// Declared parameter types, in order
    fn param_types(&self) -> Vec<&'static str>;

    /// Declared result types, in order
    fn return_types(&self) -> Vec<&'static str>;

    /// Check arity and per-argument types without invoking
    fn validate(&self, args: &[Value]) -> Result<()>;

    /// Validate, then invoke and collect every result
    fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>>;
}

/// Typed adapter produced by [`callable`].
pub struct FnAdapter<F, Args> {
    f: F,
    _args: PhantomData<fn(Args)>,
}

impl<F, Args> fmt::Debug for FnAdapter<F, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAdapter")
            .field("function", &type_name::<F>())
            .finish()
    }
}

/// Conversion of a plain function or closure into a [`Callable`].
///
/// `Marker` is the argument tuple; it only exists so one blanket impl per
/// arity can coexist.
pub trait IntoCallable<Marker> {
    type Callable: Callable;

    fn into_callable(self) -> Self::Callable;
}

/// Wrap a function or closure so it can be traced with captured arguments.
pub fn callable<F, Marker>(f: F) -> F::Callable
where
    F: IntoCallable<Marker>,
{
    f.into_callable()
}

/// Identity of a function or closure type: its full type path
pub fn identity_of<F: ?Sized>() -> &'static str {
    type_name::<F>()
}

/// `path(P1,P2)->(R1,R2)`; each part omitted when empty.
pub fn signature_identity(path: &str, params: &[&str], returns: &[&str]) -> String {
    let mut identity = path.to_string();
    if !params.is_empty() {
        identity = format!("{}({})", identity, params.join(","));
    }
    if !returns.is_empty() {
        identity = format!("{}->({})", identity, returns.join(","));
    }
    identity
}

macro_rules! impl_callable {
    ($($arg:ident),*) => {
        impl<F, R, $($arg),*> Callable for FnAdapter<F, ($($arg,)*)>
        where
            F: Fn($($arg),*) -> R,
            R: IntoResults,
            $($arg: Any + Send,)*
        {
            fn identity(&self) -> String {
                signature_identity(identity_of::<F>(), &self.param_types(), &R::result_types())
            }

            fn param_types(&self) -> Vec<&'static str> {
                vec![$(type_name::<$arg>()),*]
            }

            fn return_types(&self) -> Vec<&'static str> {
                R::result_types()
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn validate(&self, args: &[Value]) -> Result<()> {
                let expected = self.param_types().len();
                if args.len() != expected {
                    return Err(Error::ArgumentCount {
                        expected,
                        got: args.len(),
                    });
                }

                let mut index = 0usize;
                $(
                    if !args[index].is::<$arg>() {
                        return Err(Error::ArgumentType {
                            index,
                            expected: type_name::<$arg>(),
                            got: args[index].type_name(),
                        });
                    }
                    index += 1;
                )*
                Ok(())
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>> {
                self.validate(&args)?;

                let mut args = args.into_iter();
                let mut index = 0usize;
                $(
                    let $arg = match args.next().map(Value::downcast::<$arg>) {
                        Some(Ok(value)) => value,
                        Some(Err(value)) => {
                            return Err(Error::ArgumentType {
                                index,
                                expected: type_name::<$arg>(),
                                got: value.type_name(),
                            })
                        }
                        None => {
                            return Err(Error::ArgumentCount {
                                expected: self.param_types().len(),
                                got: index,
                            })
                        }
                    };
                    index += 1;
                )*

                Ok((self.f)($($arg),*).into_results())
            }
        }

        impl<F, R, $($arg),*> IntoCallable<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R,
            R: IntoResults,
            $($arg: Any + Send,)*
        {
            type Callable = FnAdapter<F, ($($arg,)*)>;

            fn into_callable(self) -> Self::Callable {
                FnAdapter {
                    f: self,
                    _args: PhantomData,
                }
            }
        }
    };
}

impl_callable!();
impl_callable!(A1);
impl_callable!(A1, A2);
impl_callable!(A1, A2, A3);
impl_callable!(A1, A2, A3, A4);
impl_callable!(A1, A2, A3, A4, A5);
impl_callable!(A1, A2, A3, A4, A5, A6);

// =============================================================================
// Tests
// =============================================================================
