//! Residency model for the CPU device

use crate::device::{DeviceProperties, KernelFootprint};
use crate::error::{DeviceError, Result};

/// Groups of `footprint` that fit on one execution unit at once.
///
/// The minimum of three limits: the per-unit group cap, the lane budget
/// (group sizes rounded up to whole lane widths) and the shared-memory
/// budget.
pub fn resident_groups_per_unit(properties: &DeviceProperties, footprint: KernelFootprint) -> Result<u32> {
    if footprint.group_size == 0 || footprint.group_size > properties.max_group_size {
        return Err(DeviceError::query_failed(format!(
            "group size {} outside 1..={}",
            footprint.group_size, properties.max_group_size
        )));
    }

    let lane_width = properties.lane_width.max(1);
    let lanes = footprint.group_size.div_ceil(lane_width) * lane_width;
    let by_lanes = properties.max_lanes_per_unit / lanes;

    let by_shared = if footprint.shared_bytes == 0 {
        u32::MAX
    } else {
        (properties.shared_bytes_per_unit / footprint.shared_bytes).min(u32::MAX as usize) as u32
    };

    let resident = properties.max_groups_per_unit.min(by_lanes).min(by_shared);
    if resident == 0 {
        return Err(DeviceError::query_failed(format!(
            "no group of {} lanes with {} shared bytes can be resident",
            footprint.group_size, footprint.shared_bytes
        )));
    }
    Ok(resident)
}
