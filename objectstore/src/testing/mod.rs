//! Test object model shared by unit and scenario tests.
//!
//! `TestObject` stands in for an application's object hierarchy: people and
//! devices carry ids and share a `Name` field, labels carry no id at all.

use std::path::Path;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::serializer::{ObjectSerializer, SerializerError};
use crate::types::{FieldValue, ObjectId};

const PERSON_TAG: u8 = 1;
const DEVICE_TAG: u8 = 2;
const LABEL_TAG: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: ObjectId,
    pub name: String,
    pub age: Option<i64>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: ObjectId,
    pub name: String,
    pub serial: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestObject {
    Person(Person),
    Device(Device),
    Label(Label),
}

impl TryFrom<TestObject> for Person {
    type Error = TestObject;

    fn try_from(object: TestObject) -> Result<Self, Self::Error> {
        match object {
            TestObject::Person(person) => Ok(person),
            other => Err(other),
        }
    }
}

impl TryFrom<TestObject> for Device {
    type Error = TestObject;

    fn try_from(object: TestObject) -> Result<Self, Self::Error> {
        match object {
            TestObject::Device(device) => Ok(device),
            other => Err(other),
        }
    }
}

#[must_use]
pub fn person(id: u128, name: &str, age: Option<i64>) -> TestObject {
    TestObject::Person(Person {
        id: ObjectId::from_u128(id),
        name: name.to_string(),
        age,
        city: None,
    })
}

#[must_use]
pub fn person_in(id: u128, name: &str, age: Option<i64>, city: &str) -> TestObject {
    TestObject::Person(Person {
        id: ObjectId::from_u128(id),
        name: name.to_string(),
        age,
        city: Some(city.to_string()),
    })
}

#[must_use]
pub fn device(id: u128, name: &str, serial: i64) -> TestObject {
    TestObject::Device(Device {
        id: ObjectId::from_u128(id),
        name: name.to_string(),
        serial,
    })
}

#[must_use]
pub fn label(text: &str) -> TestObject {
    TestObject::Label(Label {
        text: text.to_string(),
    })
}

/// Configuration for a store under `dir` with a small cache and a short
/// lock timeout.
#[must_use]
pub fn test_config(dir: &Path) -> StoreConfig {
    StoreConfig::new(dir)
        .with_lock_timeout(Duration::from_millis(200))
        .with_cache_blocks(64)
}

/// Length-prefixed little-endian encoding of `TestObject`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestSerializer;

impl ObjectSerializer for TestSerializer {
    type Object = TestObject;

    fn serialize(&self, object: &TestObject) -> Result<Vec<u8>, SerializerError> {
        let mut out = Vec::new();
        match object {
            TestObject::Person(p) => {
                out.push(PERSON_TAG);
                out.extend_from_slice(p.id.as_bytes());
                put_str(&mut out, &p.name)?;
                match p.age {
                    Some(age) => {
                        out.push(1);
                        out.extend_from_slice(&age.to_le_bytes());
                    }
                    None => out.push(0),
                }
                match &p.city {
                    Some(city) => {
                        out.push(1);
                        put_str(&mut out, city)?;
                    }
                    None => out.push(0),
                }
            }
            TestObject::Device(d) => {
                out.push(DEVICE_TAG);
                out.extend_from_slice(d.id.as_bytes());
                put_str(&mut out, &d.name)?;
                out.extend_from_slice(&d.serial.to_le_bytes());
            }
            TestObject::Label(l) => {
                out.push(LABEL_TAG);
                put_str(&mut out, &l.text)?;
            }
        }
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TestObject, SerializerError> {
        let mut reader = Reader { bytes, pos: 0 };
        let object = match reader.u8()? {
            PERSON_TAG => {
                let id = reader.id()?;
                let name = reader.string()?;
                let age = if reader.u8()? == 1 {
                    Some(reader.i64()?)
                } else {
                    None
                };
                let city = if reader.u8()? == 1 {
                    Some(reader.string()?)
                } else {
                    None
                };
                TestObject::Person(Person {
                    id,
                    name,
                    age,
                    city,
                })
            }
            DEVICE_TAG => TestObject::Device(Device {
                id: reader.id()?,
                name: reader.string()?,
                serial: reader.i64()?,
            }),
            LABEL_TAG => TestObject::Label(Label {
                text: reader.string()?,
            }),
            tag => return Err(SerializerError::new(format!("unknown tag {tag}"))),
        };
        if reader.pos != bytes.len() {
            return Err(SerializerError::new("trailing bytes"));
        }
        Ok(object)
    }

    fn field_value(&self, name: &str, object: &TestObject) -> Option<FieldValue> {
        match (object, name) {
            (TestObject::Person(p), "Name") => Some(FieldValue::from(p.name.as_str())),
            (TestObject::Person(p), "Age") => p.age.map(FieldValue::Integer),
            (TestObject::Person(p), "City") => p.city.as_deref().map(FieldValue::from),
            (TestObject::Person(_), "Kind") => Some(FieldValue::from("person")),
            (TestObject::Device(d), "Name") => Some(FieldValue::from(d.name.as_str())),
            (TestObject::Device(d), "Serial") => Some(FieldValue::Integer(d.serial)),
            (TestObject::Device(_), "Kind") => Some(FieldValue::from("device")),
            (TestObject::Label(l), "Text") => Some(FieldValue::from(l.text.as_str())),
            (TestObject::Label(_), "Kind") => Some(FieldValue::from("label")),
            _ => None,
        }
    }

    fn object_id(&self, object: &TestObject) -> Option<ObjectId> {
        match object {
            TestObject::Person(p) => Some(p.id),
            TestObject::Device(d) => Some(d.id),
            TestObject::Label(_) => None,
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<(), SerializerError> {
    let len = u32::try_from(s.len()).map_err(|_| SerializerError::new("string too long"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializerError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or_else(|| SerializerError::new("truncated payload"))?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SerializerError> {
        Ok(self.take(1)?[0])
    }

    fn i64(&mut self) -> Result<i64, SerializerError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn id(&mut self) -> Result<ObjectId, SerializerError> {
        ObjectId::from_slice(self.take(ObjectId::LEN)?)
            .ok_or_else(|| SerializerError::new("bad object id"))
    }

    fn string(&mut self) -> Result<String, SerializerError> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        let len = u32::from_le_bytes(len) as usize;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| SerializerError::new("string is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializer_roundtrip_and_fields() {
        let serializer = TestSerializer;
        for object in [
            person_in(1, "ada", Some(36), "London"),
            person(2, "bob", None),
            device(3, "sensor", -7),
            label("todo"),
        ] {
            let bytes = serializer.serialize(&object).expect("serialize");
            assert_eq!(serializer.deserialize(&bytes).expect("deserialize"), object);
        }

        let ada = person(1, "ada", None);
        assert_eq!(serializer.field_value("Age", &ada), None);
        assert_eq!(
            serializer.field_value("Kind", &ada),
            Some(FieldValue::String("person".to_string()))
        );
        assert_eq!(serializer.object_id(&label("x")), None);
        assert!(serializer.deserialize(&[9]).is_err());
        assert!(serializer.deserialize(&[PERSON_TAG, 1, 2]).is_err());
    }
}
