/// Declare enum that is convertible from a platform value via automatic
/// TryFrom implementation, and whose variants map to a Bluetooth wire code
macro_rules! coded_enum {
    (
        $(#[$attr:meta])*
        $visibility:vis enum $name:ident::<$type:ty> {
            $( $variant:ident = $value:literal => $code:literal ),*
        }
    ) => {
        $(#[$attr])*
        $visibility enum $name {
            $(
                $variant = $value
            ),*
        }

        impl $name {
            pub fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code,)*
                }
            }
        }

        impl TryFrom<$type> for $name {
            type Error = anyhow::Error;

            fn try_from(v: $type) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == Self::$variant as $type => Ok(Self::$variant),)*
                    _ => Err(anyhow::anyhow!("No {} for value {}", stringify!($name), v)),
                }
            }
        }
    };
}

pub(crate) use coded_enum;
