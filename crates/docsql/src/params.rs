//! Parameter-binding macros

/// Positional parameters for `?` placeholders.
///
/// ```ignore
/// cursor.execute("SELECT * FROM users WHERE age > ? AND name = ?", params![25, "ann"])?;
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::Params::None };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}

/// Named parameters for `:name` placeholders.
///
/// ```ignore
/// cursor.execute("SELECT * FROM users WHERE age > :age", named_params! { "age" => 25 })?;
/// ```
#[macro_export]
macro_rules! named_params {
    () => { $crate::Params::None };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut named = $crate::IndexMap::new();
        $( named.insert(::std::string::String::from($name), $crate::Value::from($value)); )+
        $crate::Params::Named(named)
    }};
}
