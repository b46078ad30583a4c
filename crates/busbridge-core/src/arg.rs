//! Argument payloads carried through callbacks.
//!
//! The core never interprets a [`MsgArg`] on its way through a trampoline; it
//! only hands the slot to the handler, which reads or fills it.

use crate::{BridgeError, MAXIMUM_SIGNATURE_LENGTH, Status};
use std::collections::BTreeMap;

/// A typed bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(String),
    /// Homogeneous array; `element` is the element signature so empty arrays stay typed.
    Array {
        element: String,
        items: Vec<ArgValue>,
    },
    Struct(Vec<ArgValue>),
    Dict {
        key: String,
        value: String,
        entries: Vec<(ArgValue, ArgValue)>,
    },
    Variant(Box<ArgValue>),
}

impl ArgValue {
    /// The type signature of this value.
    pub fn signature(&self) -> String {
        match self {
            ArgValue::Bool(_) => "b".into(),
            ArgValue::Byte(_) => "y".into(),
            ArgValue::Int32(_) => "i".into(),
            ArgValue::UInt32(_) => "u".into(),
            ArgValue::Int64(_) => "x".into(),
            ArgValue::UInt64(_) => "t".into(),
            ArgValue::Double(_) => "d".into(),
            ArgValue::String(_) => "s".into(),
            ArgValue::ObjectPath(_) => "o".into(),
            ArgValue::Signature(_) => "g".into(),
            ArgValue::Array { element, .. } => format!("a{element}"),
            ArgValue::Struct(fields) => {
                let inner: String = fields.iter().map(ArgValue::signature).collect();
                format!("({inner})")
            }
            ArgValue::Dict { key, value, .. } => format!("a{{{key}{value}}}"),
            ArgValue::Variant(_) => "v".into(),
        }
    }

    /// Array of strings, the shape used for interface lists.
    pub fn string_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArgValue::Array {
            element: "s".into(),
            items: items.into_iter().map(|s| ArgValue::String(s.into())).collect(),
        }
    }
}

/// A payload slot passed verbatim between the native layer and handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsgArg {
    value: Option<ArgValue>,
}

impl MsgArg {
    /// An empty slot, as handed to a property-get handler.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: ArgValue) -> Self {
        Self { value: Some(value) }
    }

    /// Store a value. Signatures longer than the bus allows are rejected.
    pub fn set(&mut self, value: impl IntoArg) -> Status {
        let value = value.into_arg();
        if value.signature().len() > MAXIMUM_SIGNATURE_LENGTH {
            tracing::debug!("Rejecting value with oversized signature");
            return Status::BUS_BAD_SIGNATURE;
        }
        self.value = Some(value);
        Status::OK
    }

    pub fn value(&self) -> Option<&ArgValue> {
        self.value.as_ref()
    }

    pub fn take(&mut self) -> Option<ArgValue> {
        self.value.take()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn signature(&self) -> Option<String> {
        self.value.as_ref().map(ArgValue::signature)
    }

    /// Read the slot as `T`.
    pub fn get<T: FromArg>(&self) -> Result<T, BridgeError> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidArg("empty argument".into()))?;
        T::from_arg(value).ok_or_else(|| {
            BridgeError::InvalidArg(format!(
                "cannot read signature '{}' as {}",
                value.signature(),
                std::any::type_name::<T>()
            ))
        })
    }
}

/// Conversion out of a bus value.
pub trait FromArg: Sized {
    fn from_arg(value: &ArgValue) -> Option<Self>;
}

/// Conversion into a bus value.
pub trait IntoArg {
    fn into_arg(self) -> ArgValue;
}

macro_rules! scalar_arg {
    ($ty:ty, $variant:ident) => {
        impl FromArg for $ty {
            fn from_arg(value: &ArgValue) -> Option<Self> {
                match value {
                    ArgValue::$variant(v) => Some(v.clone()),
                    ArgValue::Variant(inner) => Self::from_arg(inner),
                    _ => None,
                }
            }
        }

        impl IntoArg for $ty {
            fn into_arg(self) -> ArgValue {
                ArgValue::$variant(self)
            }
        }
    };
}

scalar_arg!(bool, Bool);
scalar_arg!(u8, Byte);
scalar_arg!(i32, Int32);
scalar_arg!(u32, UInt32);
scalar_arg!(i64, Int64);
scalar_arg!(u64, UInt64);
scalar_arg!(f64, Double);
scalar_arg!(String, String);

impl IntoArg for &str {
    fn into_arg(self) -> ArgValue {
        ArgValue::String(self.to_string())
    }
}

impl IntoArg for ArgValue {
    fn into_arg(self) -> ArgValue {
        self
    }
}

impl FromArg for ArgValue {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Object description carried by an announce signal: object path to the
/// interfaces it implements (signature `a(oas)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDescription {
    objects: BTreeMap<String, Vec<String>>,
}

impl ObjectDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and its interfaces.
    pub fn with_object<I, S>(mut self, path: impl Into<String>, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objects
            .entry(path.into())
            .or_default()
            .extend(interfaces.into_iter().map(Into::into));
        self
    }

    /// Parse the announce payload.
    pub fn from_arg(arg: &MsgArg) -> Result<Self, BridgeError> {
        let invalid = || BridgeError::InvalidArg("object description must be a(oas)".into());
        let Some(ArgValue::Array { items, .. }) = arg.value() else {
            return Err(invalid());
        };

        let mut description = ObjectDescription::new();
        for item in items {
            let ArgValue::Struct(fields) = item else {
                return Err(invalid());
            };
            let [ArgValue::ObjectPath(path), ArgValue::Array { items: ifaces, .. }] =
                fields.as_slice()
            else {
                return Err(invalid());
            };
            let names = ifaces
                .iter()
                .map(|i| String::from_arg(i).ok_or_else(invalid))
                .collect::<Result<Vec<_>, _>>()?;
            description = description.with_object(path.clone(), names);
        }
        Ok(description)
    }

    /// Build the announce payload.
    pub fn to_arg(&self) -> MsgArg {
        let items = self
            .objects
            .iter()
            .map(|(path, ifaces)| {
                ArgValue::Struct(vec![
                    ArgValue::ObjectPath(path.clone()),
                    ArgValue::string_array(ifaces.iter().cloned()),
                ])
            })
            .collect();
        MsgArg::from_value(ArgValue::Array {
            element: "(oas)".into(),
            items,
        })
    }

    /// The object path implementing `interface`, if any object announces it.
    pub fn object_path(&self, interface: &str) -> Option<&str> {
        self.objects
            .iter()
            .find(|(_, ifaces)| ifaces.iter().any(|i| i == interface))
            .map(|(path, _)| path.as_str())
    }

    pub fn interfaces(&self, path: &str) -> &[String] {
        self.objects.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}
