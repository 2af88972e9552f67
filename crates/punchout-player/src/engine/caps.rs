use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Typed field value of a stream capability descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum CapsValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Buffer(Bytes),
}

/// Stream capability descriptor: a media type plus named fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Caps {
    media_type: String,
    fields: BTreeMap<String, CapsValue>,
}

impl Caps {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_int(mut self, name: &str, value: i64) -> Self {
        self.set(name, CapsValue::Int(value));
        self
    }

    pub fn with_bool(mut self, name: &str, value: bool) -> Self {
        self.set(name, CapsValue::Bool(value));
        self
    }

    pub fn with_str(mut self, name: &str, value: &str) -> Self {
        self.set(name, CapsValue::Str(value.to_string()));
        self
    }

    pub fn with_buffer(mut self, name: &str, value: Bytes) -> Self {
        self.set(name, CapsValue::Buffer(value));
        self
    }

    pub fn set(&mut self, name: &str, value: CapsValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn get(&self, name: &str) -> Option<&CapsValue> {
        self.fields.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(CapsValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(CapsValue::Str(v)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.fields {
            match value {
                CapsValue::Int(v) => write!(f, ", {name}=(int){v}")?,
                CapsValue::Bool(v) => write!(f, ", {name}=(boolean){v}")?,
                CapsValue::Str(v) => write!(f, ", {name}=(string){v}")?,
                CapsValue::Buffer(v) => {
                    write!(f, ", {name}=(buffer)")?;
                    for byte in v.iter() {
                        write!(f, "{byte:02x}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_fields_in_name_order() {
        let caps = Caps::new("audio/mpeg")
            .with_int("mpegversion", 4)
            .with_bool("framed", true)
            .with_buffer("codec_data", Bytes::from_static(&[0x12, 0x10]));
        assert_eq!(
            caps.to_string(),
            "audio/mpeg, codec_data=(buffer)1210, framed=(boolean)true, mpegversion=(int)4"
        );
        assert_eq!(caps.int("mpegversion"), Some(4));
        assert_eq!(caps.str("mpegversion"), None);
    }
}
