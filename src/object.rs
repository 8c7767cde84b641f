pub mod coroutine;
pub mod function;
pub mod native;
pub mod ptr;
pub mod string;
pub mod table;

pub use coroutine::{Coroutine, CoroutineStatus};
pub use function::{Closure, Function, TypeHint, Upvalue};
pub use native::{NativeFlow, NativeFunction};
pub use ptr::Ptr;
pub use string::Str;
pub use table::{Key, Table};
