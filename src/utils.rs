
/**
    declare a fieldless wire enum backed by an integer

    the variant named after `else` receives every value outside the known set, so that decoding a raw integer never fails and never loses the original value
*/
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident else $fallback:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )*
            $fallback($repr),
        }
        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                match value {
                    $( v if v == $value => Self::$variant, )*
                    other => Self::$fallback(other),
                }
            }
        }
        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )*
                    $name::$fallback(other) => other,
                }
            }
        }
    };
}
