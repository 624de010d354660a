/// Constructs a [`Value`][crate::Value] map from a list of entries.
///
/// Keys are identifiers or string literals. Values may be `None`, a nested
/// `{ ... }` map, a `[ ... ]` list, or any expression with a
/// [`From`] conversion into `Value`, including cells and functions.
///
/// ```
/// let v = tessera::value! {
///     user: { name: "John", age: 42 },
///     tags: ["a", "b"],
///     "data-id": 7,
///     manager: None,
/// };
/// assert_eq!(v.get("tags")?.get("1")?, tessera::Value::from("b"));
/// assert_eq!(v.get("data-id")?, tessera::Value::from(7));
/// # Ok::<(), tessera::Error>(())
/// ```
///
/// A bracketed list at the top level builds a list instead.
#[macro_export]
macro_rules! value {
    ([ $($tt:tt)* ]) => {
        $crate::Value::List($crate::_value!(@list [] $($tt)*))
    };
    ($($tt:tt)*) => {
        $crate::_value!({ $($tt)* })
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! _value {
    // Map entries, inserted one at a time into `$map`.
    (@map $map:ident) => {};
    (@map $map:ident $key:tt : None $(, $($rest:tt)*)?) => {
        $crate::_value!(@insert $map $key $crate::Value::None);
        $crate::_value!(@map $map $($($rest)*)?);
    };
    (@map $map:ident $key:tt : [ $($list:tt)* ] $(, $($rest:tt)*)?) => {
        $crate::_value!(@insert $map $key $crate::value!([ $($list)* ]));
        $crate::_value!(@map $map $($($rest)*)?);
    };
    (@map $map:ident $key:tt : { $($inner:tt)* } $(, $($rest:tt)*)?) => {
        $crate::_value!(@insert $map $key $crate::_value!({ $($inner)* }));
        $crate::_value!(@map $map $($($rest)*)?);
    };
    (@map $map:ident $key:tt : $value:expr $(, $($rest:tt)*)?) => {
        $crate::_value!(@insert $map $key $crate::Value::from($value));
        $crate::_value!(@map $map $($($rest)*)?);
    };

    (@insert $map:ident $key:ident $value:expr) => {
        $map.insert(::std::string::String::from(stringify!($key)), $value);
    };
    (@insert $map:ident $key:literal $value:expr) => {
        $map.insert(::std::string::String::from($key), $value);
    };

    // List elements, accumulated as expressions until the input runs out.
    (@list [$($done:expr),*]) => {
        ::std::vec![$($done),*]
    };
    (@list [$($done:expr),*] None $(, $($rest:tt)*)?) => {
        $crate::_value!(@list [$($done,)* $crate::Value::None] $($($rest)*)?)
    };
    (@list [$($done:expr),*] [ $($list:tt)* ] $(, $($rest:tt)*)?) => {
        $crate::_value!(@list [$($done,)* $crate::value!([ $($list)* ])] $($($rest)*)?)
    };
    (@list [$($done:expr),*] { $($inner:tt)* } $(, $($rest:tt)*)?) => {
        $crate::_value!(@list [$($done,)* $crate::_value!({ $($inner)* })] $($($rest)*)?)
    };
    (@list [$($done:expr),*] $next:expr $(, $($rest:tt)*)?) => {
        $crate::_value!(@list [$($done,)* $crate::Value::from($next)] $($($rest)*)?)
    };

    ({ $($tt:tt)* }) => {{
        #[allow(unused_mut)]
        let mut map = $crate::value::Map::new();
        $crate::_value!(@map map $($tt)*);
        $crate::Value::Map(map)
    }};
}

#[cfg(test)]
mod tests {
    use crate::tag::{Cell, Runtime};
    use crate::value::{List, Map};
    use crate::{Func, Value};

    #[test]
    fn value_empty() {
        assert_eq!(value! {}, Value::Map(Map::new()));
        assert_eq!(value!([]), Value::List(List::new()));
    }

    #[test]
    fn value_list() {
        let v = value!(["testing...", None, {}, [], 1 + 2]);
        assert_eq!(
            v,
            Value::from([
                Value::from("testing..."),
                Value::None,
                Value::Map(Map::new()),
                Value::List(List::new()),
                Value::Integer(3),
            ])
        )
    }

    #[test]
    fn value_map() {
        let v = value! { x: "hello" };
        assert_eq!(v, Value::from([("x", "hello")]));

        let v = value! { x: "hello", };
        assert_eq!(v, Value::from([("x", "hello")]));

        let v = value! { x: "hello", "y-z": String::from("world!") };
        assert_eq!(v, Value::from([("x", "hello"), ("y-z", "world!")]));
    }

    #[test]
    fn value_map_nested() {
        let v = value! {
            w: None,
            x: {
                y: ["hello", { z: "world!" }],
            },
        };
        let exp = Value::from([
            ("w", Value::None),
            (
                "x",
                Value::from([(
                    "y",
                    Value::from([Value::from("hello"), Value::from([("z", "world!")])]),
                )]),
            ),
        ]);
        assert_eq!(v, exp);
    }

    #[test]
    fn value_map_binds_cells_and_funcs() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 1);
        let f = Func::new("f", |_| Ok(Value::None));
        let v = value! { cell: cell.clone(), f: f };
        assert!(matches!(v.get("cell").unwrap(), Value::Cell(_)));
        assert!(matches!(v.get("f").unwrap(), Value::Func(_)));

        cell.set(2);
        assert_eq!(v.get("cell").unwrap().resolve(), Value::from(2));
    }
}
