//! Typed puts and the consistency merge.
//!
//! Every write lands on the channel's node in the output tree. Fixed-width
//! writes made without a new time being set extend the existing block in
//! place; writes that cannot extend it become unnamed sibling nodes, so that
//! each physical block keeps a uniform point layout. Strings and user data
//! always get a node of their own.

use super::time::TimeMode;
use super::ChannelMap;
use crate::error::{Result, TurbineError};
use crate::rmap::{DataBlock, DataNode, NodeId, TimeRange};
use crate::types::{ByteOrder, ChannelData, DataType};

impl ChannelMap {
    pub fn put_data_as_f64(&mut self, index: usize, values: &[f64]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Float64(values.to_vec()))
    }

    pub fn put_data_as_f32(&mut self, index: usize, values: &[f32]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Float32(values.to_vec()))
    }

    pub fn put_data_as_i64(&mut self, index: usize, values: &[i64]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Int64(values.to_vec()))
    }

    pub fn put_data_as_i32(&mut self, index: usize, values: &[i32]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Int32(values.to_vec()))
    }

    pub fn put_data_as_i16(&mut self, index: usize, values: &[i16]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Int16(values.to_vec()))
    }

    pub fn put_data_as_i8(&mut self, index: usize, values: &[i8]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::Int8(values.to_vec()))
    }

    /// One string point.
    pub fn put_data_as_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.put_channel_data(index, &ChannelData::String(vec![value.to_string()]))
    }

    /// One byte-array point.
    pub fn put_data_as_byte_array(&mut self, index: usize, value: &[u8]) -> Result<()> {
        self.put_channel_data(index, &ChannelData::ByteArray(vec![value.to_vec()]))
    }

    /// Descriptive text merged into the channel's registration metadata.
    pub fn put_user_info(&mut self, index: usize, info: &str) -> Result<()> {
        self.put_channel_data(index, &ChannelData::User(vec![info.as_bytes().to_vec()]))
    }

    /// Typed values of any kind.
    pub fn put_channel_data(&mut self, index: usize, data: &ChannelData) -> Result<()> {
        self.put_block(index, DataBlock::from_data(data, ByteOrder::Msb))
    }

    /// Raw bytes of type `data_type` in byte order `order`.
    ///
    /// Fixed-width data must be a whole number of elements; strings, byte
    /// arrays and user data take the whole buffer as one point.
    pub fn put_data(
        &mut self,
        index: usize,
        bytes: &[u8],
        data_type: DataType,
        order: ByteOrder,
    ) -> Result<()> {
        let block = if data_type.is_variable_width() {
            DataBlock::from_points(vec![bytes.to_vec()], data_type)
        } else {
            DataBlock::packed(bytes.to_vec(), data_type, order)?
        };
        self.put_block(index, block)
    }

    /// Set the MIME type of a channel. Before the first write it is kept for
    /// later data; afterwards it rewrites every block already staged.
    pub fn put_mime(&mut self, index: usize, mime: &str) {
        let Ok(channel) = self.channel_mut(index) else {
            tracing::warn!("put_mime on unknown channel {}", index);
            return;
        };
        let staged = channel.node;
        match staged {
            None => channel.mime = Some(mime.to_string()),
            Some(node) => {
                for id in self.output.walk(node) {
                    if let Some(block) = self.output.node_mut(id).block.as_mut() {
                        block.set_mime(Some(mime.to_string()));
                    }
                }
            }
        }
    }

    /// Forward channel `src_index` of `source` (data, type and MIME) to
    /// channel `dest` of this map.
    ///
    /// Multi-point strings, byte arrays and user data are written one point
    /// at a time with the matching per-point time.
    pub fn put_data_ref(&mut self, dest: usize, source: &ChannelMap, src_index: usize) -> Result<()> {
        let array = source.channel(src_index)?.result.as_ref().ok_or_else(|| {
            TurbineError::InvalidArgument(format!(
                "Channel {} of the source map holds no data",
                src_index
            ))
        })?;
        let Some(block) = array.block().cloned() else {
            return Ok(());
        };
        let mime = block.mime().map(str::to_string);

        if block.data_type().is_variable_width() && block.points() != 1 {
            self.unroll_data_ref(dest, &block)?;
        } else {
            self.put_block(dest, block)?;
        }
        if let Some(mime) = mime {
            self.put_mime(dest, &mime);
        }
        Ok(())
    }

    fn unroll_data_ref(&mut self, dest: usize, block: &DataBlock) -> Result<()> {
        let saved = self.time.clone();
        let points = block.points();
        // in frame-level mode the range goes on the base frame and the
        // points carry no times of their own
        let range = match self.time.mode {
            TimeMode::Reference => self.time.reference.clone(),
            _ => self.frame_time_range()?,
        };
        let times = range.filter(|tr| !tr.is_server_tod()).map(|tr| {
            let per_point = if tr.duration() != 0.0 && tr.times().len() == 1 {
                tr.duration() / points as f64
            } else {
                0.0
            };
            (tr.copy_times(points), per_point)
        });

        let mut outcome = Ok(());
        for point in 0..points {
            if let Some((times, per_point)) = &times {
                self.put_time(times[point], *per_point);
            }
            outcome = self.put_block(dest, block.select(point..point + 1));
            if outcome.is_err() {
                break;
            }
        }
        self.time = saved;
        outcome
    }

    /// Add the `key=value` option for PlugIn channel `channel`.
    pub fn add_plugin_option(&mut self, channel: &str, key: &str, value: &str) -> Result<()> {
        let index = self.add(&format!("{}/.", channel))?;
        self.put_data_as_string(index, &format!("{}={}", key, value))
    }

    pub(crate) fn put_block(&mut self, index: usize, mut block: DataBlock) -> Result<()> {
        let channel = self.channel(index)?;
        if let Some(mime) = &channel.mime {
            block.set_mime(Some(mime.clone()));
        }
        let staged = channel.node;
        if self.time.mode == TimeMode::Array {
            let supplied = self.time.point_times.as_ref().map_or(0, |t| t.len());
            if supplied != block.points() {
                return Err(TurbineError::InvalidArgument(format!(
                    "{} times supplied for {} points",
                    supplied,
                    block.points()
                )));
            }
        }

        let node = match staged {
            Some(node) => node,
            None => {
                let root = self.output.root();
                let name = self.channels[index].name.clone();
                let node = self.output.add_channel(root, &name);
                self.channels[index].node = Some(node);
                node
            }
        };

        if self.time.mode == TimeMode::Reference {
            let reference = self.time.reference.clone().ok_or_else(|| {
                TurbineError::InvalidState("Reference time mode without a reference".into())
            })?;
            self.channels_put += 1;
            return self.attach_with_reference(node, block, reference);
        }

        let tr = self.frame_time_range()?;
        self.merge(index, node, block, tr);
        Ok(())
    }

    fn attach_with_reference(&mut self, node: NodeId, block: DataBlock, tr: TimeRange) -> Result<()> {
        if tr.times().len() != block.points() {
            return Err(TurbineError::InvalidArgument(format!(
                "The number of points ({}) does not match the reference ({})",
                block.points(),
                tr.times().len()
            )));
        }
        let target = self.output.node_mut(node);
        if target.block.is_none() && target.time.is_none() && target.children().is_empty() {
            target.block = Some(block);
            target.time = Some(tr);
            return Ok(());
        }
        if target.block.is_some() || target.time.is_some() {
            let existing = target.take_payload();
            self.output.insert_child(node, 0, existing);
        }
        self.output
            .add_child(node, DataNode::unnamed().with_block(block).with_time(Some(tr)));
        Ok(())
    }

    /// Place `block` with range `tr` at the channel node `node`.
    fn merge(&mut self, index: usize, node: NodeId, block: DataBlock, tr: Option<TimeRange>) {
        let counter = self.set_time_counter;
        let data_type = block.data_type();
        let child_count = self.output.children(node).len();

        if child_count == 0 {
            let target = self.output.node_mut(node);
            let Some(existing) = target.block.as_mut() else {
                target.block = Some(block);
                target.time = tr;
                self.channels[index].last_set_time_count = counter;
                return;
            };

            let compatible = existing.accepts(&block);
            if compatible && self.channels[index].last_set_time_count == counter {
                existing.append(block);
                return;
            }

            self.channels[index].last_set_time_count = counter;
            if compatible && self.check_consistency(node, true, tr.as_ref(), &block) {
                self.append_to(node, block);
                return;
            }

            let target = self.output.node_mut(node);
            let demoted = target.take_payload();
            self.output.add_child(node, demoted);
            self.output
                .add_child(node, DataNode::unnamed().with_block(block).with_time(tr));
            self.channels[index].last_consistent_child = Some(1);
            return;
        }

        if data_type.is_variable_width() || self.channels[index].last_set_time_count != counter {
            self.channels[index].last_set_time_count = counter;
            if !data_type.is_text() {
                let children = self.output.children(node).to_vec();
                for (position, child) in children.iter().enumerate().rev() {
                    let fits = self
                        .output
                        .node(*child)
                        .block
                        .as_ref()
                        .is_some_and(|b| b.accepts(&block));
                    if fits && self.check_consistency(*child, false, tr.as_ref(), &block) {
                        self.append_to(*child, block);
                        self.channels[index].last_consistent_child = Some(position);
                        return;
                    }
                }
            }
            self.add_unnamed_child(index, node, block, tr);
            return;
        }

        let cursor = self.channels[index].last_consistent_child.and_then(|position| {
            let child = *self.output.children(node).get(position)?;
            let target = self.output.node(child);
            let usable = !target.is_named()
                && target.block.as_ref().is_some_and(|b| b.accepts(&block));
            usable.then_some(child)
        });
        match cursor {
            Some(child) => self.append_to(child, block),
            None => self.add_unnamed_child(index, node, block, tr),
        }
    }

    fn add_unnamed_child(&mut self, index: usize, node: NodeId, block: DataBlock, tr: Option<TimeRange>) {
        self.output
            .add_child(node, DataNode::unnamed().with_block(block).with_time(tr));
        let children = self.output.children(node);
        self.channels[index].last_consistent_child = children
            .iter()
            .rposition(|c| !self.output.node(*c).is_named());
    }

    fn append_to(&mut self, node: NodeId, block: DataBlock) {
        if let Some(existing) = self.output.node_mut(node).block.as_mut() {
            existing.append(block);
        }
    }

    /// True when `block` with range `tr` may extend the data at `node`.
    ///
    /// The node's namedness must match `expect_named`. An existing range must
    /// extend numerically over the new one; two frame-level (absent) ranges
    /// are trivially consistent. On success the node's range is extended; the
    /// caller appends the data.
    fn check_consistency(
        &mut self,
        node: NodeId,
        expect_named: bool,
        tr: Option<&TimeRange>,
        block: &DataBlock,
    ) -> bool {
        let target = self.output.node_mut(node);
        if target.is_named() != expect_named {
            return false;
        }
        let old_points = target.block.as_ref().map_or(0, DataBlock::points);
        match (target.time.as_mut(), tr) {
            (Some(old), Some(new)) => old.extend(old_points, new, block.points()),
            (None, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelData;
    use proptest::prelude::*;

    fn staged_blocks(map: &ChannelMap, index: usize) -> Vec<DataBlock> {
        let node = map.channels[index].node.unwrap();
        map.output
            .walk(node)
            .into_iter()
            .filter_map(|id| map.output.node(id).block.clone())
            .collect()
    }

    #[test]
    fn test_fixed_width_writes_coalesce() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        map.put_data_as_f64(c, &[1.0, 2.0]).unwrap();
        map.put_data_as_f64(c, &[3.0]).unwrap();
        let blocks = staged_blocks(&map, c);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].to_channel_data(),
            Some(ChannelData::Float64(vec![1.0, 2.0, 3.0]))
        );
    }

    #[test]
    fn test_contiguous_time_extends_block() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        let other = map.add("other").unwrap();
        map.put_time(0.0, 1.0);
        map.put_data_as_i32(c, &[1, 2]).unwrap();
        map.put_data_as_i32(other, &[9]).unwrap();
        map.put_time(1.0, 1.0);
        map.put_data_as_i32(c, &[3, 4]).unwrap();

        let node = map.channels[c].node.unwrap();
        assert!(map.output.children(node).is_empty());
        assert_eq!(map.output.node(node).time, Some(TimeRange::new(0.0, 2.0)));
        assert_eq!(staged_blocks(&map, c)[0].points(), 4);
    }

    #[test]
    fn test_inconsistent_time_splits_into_siblings() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        map.put_time(0.0, 1.0);
        map.put_data_as_i32(c, &[1, 2]).unwrap();
        map.put_time(10.0, 1.0);
        map.put_data_as_i32(c, &[3, 4]).unwrap();

        let node = map.channels[c].node.unwrap();
        let children = map.output.children(node).to_vec();
        assert_eq!(children.len(), 2);
        assert!(map.output.node(node).block.is_none());
        assert_eq!(
            map.output.node(children[1]).time,
            Some(TimeRange::new(10.0, 1.0))
        );
        assert_eq!(map.channels[c].last_consistent_child, Some(1));

        // no new time: extends the cursor child
        map.put_data_as_i32(c, &[5]).unwrap();
        assert_eq!(map.output.node(children[1]).block.as_ref().unwrap().points(), 3);
    }

    #[test]
    fn test_strings_never_coalesce() {
        let mut map = ChannelMap::new();
        let c = map.add("log").unwrap();
        map.put_data_as_string(c, "one").unwrap();
        map.put_data_as_string(c, "two").unwrap();
        map.put_data_as_string(c, "three").unwrap();
        let blocks = staged_blocks(&map, c);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.points() == 1));
    }

    #[test]
    fn test_byte_arrays_split_on_size_change() {
        let mut map = ChannelMap::new();
        let c = map.add("raw").unwrap();
        map.put_data_as_byte_array(c, &[1, 2]).unwrap();
        map.put_data_as_byte_array(c, &[3]).unwrap();
        let blocks = staged_blocks(&map, c);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].points(), 1);
    }

    #[test]
    fn test_type_change_splits() {
        let mut map = ChannelMap::new();
        let c = map.add("mixed").unwrap();
        map.put_data_as_i32(c, &[1]).unwrap();
        map.put_data_as_f64(c, &[2.0]).unwrap();
        map.put_data_as_i32(c, &[3]).unwrap();
        let types: Vec<DataType> = staged_blocks(&map, c).iter().map(DataBlock::data_type).collect();
        assert_eq!(types, vec![DataType::Int32, DataType::Float64, DataType::Int32]);
    }

    #[test]
    fn test_put_data_raw_size_check() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        let err = map
            .put_data(c, &[0; 6], DataType::Float32, ByteOrder::Lsb)
            .unwrap_err();
        assert!(matches!(err, TurbineError::InvalidSize { len: 6, element_size: 4 }));
        map.put_data(c, &[0; 8], DataType::Float32, ByteOrder::Lsb).unwrap();
        assert!(matches!(
            map.put_data_as_i32(7, &[1]),
            Err(TurbineError::IndexOutOfRange { index: 7, len: 1 })
        ));
    }

    #[test]
    fn test_put_mime_sticky_then_rewrite() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        map.put_mime(c, "text/plain");
        map.put_data_as_string(c, "a").unwrap();
        assert_eq!(staged_blocks(&map, c)[0].mime(), Some("text/plain"));
        map.put_mime(c, "text/xml");
        assert_eq!(staged_blocks(&map, c)[0].mime(), Some("text/xml"));
    }

    #[test]
    fn test_array_times_must_match_points() {
        let mut map = ChannelMap::new();
        let c = map.add("c").unwrap();
        map.put_times(&[1.0, 2.0]).unwrap();
        assert!(map.put_data_as_f64(c, &[1.0]).is_err());
        map.put_data_as_f64(c, &[1.0, 2.0]).unwrap();
    }

    #[test]
    fn test_unrolled_reference_keeps_frame_level_time() {
        let mut tree = crate::rmap::DataTree::new();
        let root = tree.root();
        let leaf = tree.add_channel(root, "/S/src/notes");
        tree.node_mut(leaf).block = Some(DataBlock::from_points(
            vec![b"a".to_vec(), b"bc".to_vec()],
            DataType::String,
        ));
        tree.node_mut(leaf).time = Some(TimeRange::from_points(vec![1.0, 2.0], 0.0));
        let mut source = ChannelMap::new();
        source.process_result(Some(tree), true, false);

        let mut map = ChannelMap::new();
        let d = map.add("notes").unwrap();
        map.put_time(5.0, 1.0);
        map.put_data_ref(d, &source, 0).unwrap();

        assert!(!map.time_per_channel);
        assert_eq!(map.time_mode(), TimeMode::Manual);
        let root = map.output.root();
        assert_eq!(map.output.node(root).time, Some(TimeRange::new(5.0, 1.0)));
        let points: usize = staged_blocks(&map, d).iter().map(DataBlock::points).sum();
        assert_eq!(points, 2);
    }

    #[test]
    fn test_plugin_option_channel() {
        let mut map = ChannelMap::new();
        map.add_plugin_option("filter", "order", "3").unwrap();
        let index = map.index_of("filter/.").unwrap();
        let blocks = staged_blocks(&map, index);
        assert_eq!(
            blocks[0].to_channel_data(),
            Some(ChannelData::String(vec!["order=3".into()]))
        );
    }

    proptest! {
        #[test]
        fn prop_fixed_width_writes_stay_contiguous(
            writes in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 1..8), 1..12),
            start in proptest::option::of(-1.0e6f64..1.0e6),
        ) {
            let mut map = ChannelMap::new();
            let c = map.add("c").unwrap();
            if let Some(start) = start {
                map.put_time(start, 1.0);
            }
            for values in &writes {
                map.put_data_as_i32(c, values).unwrap();
            }

            let blocks = staged_blocks(&map, c);
            prop_assert_eq!(blocks.len(), 1);
            let expected: Vec<i32> = writes.concat();
            prop_assert_eq!(blocks[0].to_channel_data(), Some(ChannelData::Int32(expected)));
        }
    }
}
