//! Test data builders for staging frames

use turbine_rs::ChannelMap;

/// Builder for a channel map holding one frame of data
pub struct FrameBuilder {
    map: ChannelMap,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            map: ChannelMap::new(),
        }
    }

    /// Stamp the data that follows with `start` and `duration`.
    pub fn time(mut self, start: f64, duration: f64) -> Self {
        self.map.put_time(start, duration);
        self
    }

    pub fn f64s(mut self, name: &str, values: &[f64]) -> Self {
        let index = self.index(name);
        self.map.put_data_as_f64(index, values).unwrap();
        self
    }

    pub fn i32s(mut self, name: &str, values: &[i32]) -> Self {
        let index = self.index(name);
        self.map.put_data_as_i32(index, values).unwrap();
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        let index = self.index(name);
        self.map.put_data_as_string(index, value).unwrap();
        self
    }

    pub fn build(self) -> ChannelMap {
        self.map
    }

    fn index(&mut self, name: &str) -> usize {
        match self.map.index_of(name) {
            Some(index) => index,
            None => self.map.add(name).unwrap(),
        }
    }
}

/// Map asking for `names`.
pub fn request_map(names: &[&str]) -> ChannelMap {
    let mut map = ChannelMap::new();
    for name in names {
        map.add(name).unwrap();
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let map = FrameBuilder::new()
            .time(0.0, 1.0)
            .i32s("c0", &[1, 2])
            .f64s("c1", &[0.5])
            .build();

        assert_eq!(map.channel_list(), vec!["c0", "c1"]);
    }
}
