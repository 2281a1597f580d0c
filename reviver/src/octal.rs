// SPDX-FileCopyrightText: 2023 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Serialize file mode bits as an octal string. toml_edit can't output
//! octal-formatted integers and a decimal `33188` is unreadable next to
//! `100644`.

use std::{
    fmt::{self, Octal},
    marker::PhantomData,
};

use num_traits::{Num, PrimInt};
use serde::{Deserializer, Serializer, de::Visitor};

pub fn serialize<S, T>(data: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: PrimInt + Octal,
{
    serializer.serialize_str(&format!("{data:o}"))
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: PrimInt,
    <T as Num>::FromStrRadixErr: fmt::Display,
{
    struct OctalStrVisitor<T>(PhantomData<T>);

    impl<T> Visitor<'_> for OctalStrVisitor<T>
    where
        T: PrimInt,
        <T as Num>::FromStrRadixErr: fmt::Display,
    {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a string containing an octal number")
        }

        fn visit_str<E>(self, data: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            T::from_str_radix(data, 8).map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_str(OctalStrVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[test]
    fn round_trip_mode() {
        #[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
        struct TestData {
            #[serde(with = "super")]
            mode: u32,
        }

        let data = TestData { mode: 0o100644 };
        let serialized = toml_edit::ser::to_string(&data).unwrap();

        assert_eq!(serialized, "mode = \"100644\"\n");

        let new_data: TestData = toml_edit::de::from_str(&serialized).unwrap();
        assert_eq!(data, new_data);
    }
}
