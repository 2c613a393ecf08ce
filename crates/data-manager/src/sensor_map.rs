//! Sensor-to-room mapping

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sensor_protocol::SensorId;
use tracing::debug;

use crate::error::DataError;

/// Room identifier from the sensor map
pub type RoomId = u16;

/// Which room each known sensor is installed in.
///
/// The text format is a whitespace-separated stream of `<room id> <sensor id>`
/// pairs; line breaks carry no meaning. Text after `#` up to the end of the
/// line is ignored. When a sensor is listed twice the later room wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorMap {
    rooms: BTreeMap<SensorId, RoomId>,
}

impl SensorMap {
    /// Parse a sensor map from any reader
    pub fn parse<R: Read>(mut reader: R) -> Result<Self, DataError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let mut tokens = text.lines().enumerate().flat_map(|(index, line)| {
            let content = line.split('#').next().unwrap_or_default();
            content.split_whitespace().map(move |token| (index + 1, token))
        });

        let mut rooms = BTreeMap::new();
        while let Some((line, room)) = tokens.next() {
            let room_id = parse_field::<RoomId>(room, "room id", line)?;
            let (line, sensor) = tokens.next().ok_or_else(|| DataError::InvalidMap {
                line,
                reason: format!("room id {} has no sensor id", room_id),
            })?;
            let sensor_id = parse_field::<SensorId>(sensor, "sensor id", line)?;

            if let Some(previous) = rooms.insert(sensor_id, room_id) {
                debug!(
                    "Sensor {} listed again on line {}: room {} replaces {}",
                    sensor_id, line, room_id, previous
                );
            }
        }

        debug!("Parsed sensor map with {} sensors", rooms.len());
        Ok(Self { rooms })
    }

    /// Read a sensor map file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        Self::parse(File::open(path)?)
    }

    /// Room of a sensor
    pub fn room_of(&self, sensor_id: SensorId) -> Option<RoomId> {
        self.rooms.get(&sensor_id).copied()
    }

    pub fn contains(&self, sensor_id: SensorId) -> bool {
        self.rooms.contains_key(&sensor_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// `(sensor, room)` pairs ordered by sensor id
    pub fn iter(&self) -> impl Iterator<Item = (SensorId, RoomId)> + '_ {
        self.rooms.iter().map(|(&sensor, &room)| (sensor, room))
    }
}

impl FromIterator<(SensorId, RoomId)> for SensorMap {
    fn from_iter<I: IntoIterator<Item = (SensorId, RoomId)>>(iter: I) -> Self {
        Self {
            rooms: iter.into_iter().collect(),
        }
    }
}

fn parse_field<T: std::str::FromStr>(token: &str, name: &str, line: usize) -> Result<T, DataError>
where
    T::Err: std::fmt::Display,
{
    token.parse().map_err(|e| DataError::InvalidMap {
        line,
        reason: format!("bad {} '{}': {}", name, token, e),
    })
}
