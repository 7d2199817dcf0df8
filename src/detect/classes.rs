use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

/// COCO ids for car, bus and truck.
pub const VEHICLE_CLASSES: [u32; 3] = [2, 5, 7];

/// Class names of the 80-class COCO label map used by YOLO checkpoints.
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

pub fn class_name(class_id: u32) -> Option<&'static str> {
    COCO_CLASS_NAMES.get(class_id as usize).copied()
}

/// Fixed set of reported class ids, configured once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassAllowList {
    ids: BTreeSet<u32>,
}

impl ClassAllowList {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Result<Self> {
        let ids: BTreeSet<u32> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(anyhow!("class allow-list must not be empty"));
        }
        Ok(Self { ids })
    }

    pub fn vehicles() -> Self {
        Self {
            ids: VEHICLE_CLASSES.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `"2,5,7"`.
    pub fn parse_csv(value: &str) -> Result<Self> {
        let ids = value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<u32>()
                    .map_err(|_| anyhow!("invalid class id '{}'", entry))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(ids)
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.ids.contains(&class_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for ClassAllowList {
    fn default() -> Self {
        Self::vehicles()
    }
}
