//! Prediction mode and coefficient table types shared by the encoder and decoder.

/// Number of coefficient plane types (Y after Y2, Y2, chroma, Y with DC).
pub const NUM_TYPES: usize = 4;
/// Number of coefficient bands.
pub const NUM_BANDS: usize = 8;
/// Number of token contexts (0 = zero neighbour, 1 = one, 2 = more).
pub const NUM_CTX: usize = 3;
/// Number of probabilities per token tree.
pub const NUM_PROBAS: usize = 11;

/// Token probabilities indexed by \[type\]\[band\]\[context\]\[node\].
pub type TokenProbTables = [[[[u8; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; NUM_TYPES];

/// Probability updates parallel to [`TokenProbTables`]; `Some` carries the new value.
pub type TokenProbUpdates = [[[[Option<u8>; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; NUM_TYPES];

/// Number of probabilities describing one motion vector component.
pub const MV_PROB_COUNT: usize = 19;

/// Motion-vector probabilities, row component first.
pub type MvProbTables = [[u8; MV_PROB_COUNT]; 2];

/// Whole-block intra prediction, shared by 16x16 luma and 8x8 chroma.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// Average of the above and left edges.
    #[default]
    DC = 0,
    /// Copies the row above.
    V = 1,
    /// Copies the column to the left.
    H = 2,
    /// TrueMotion: left + above - corner.
    TM = 3,
}

/// 4x4 subblock intra prediction modes, in bitstream order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IntraMode {
    #[default]
    DC = 0,
    TM = 1,
    VE = 2,
    HE = 3,
    LD = 4,
    RD = 5,
    VR = 6,
    VL = 7,
    HD = 8,
    HU = 9,
}

/// How an inter macroblock's motion vector is coded.
///
/// Split motion vectors are never produced, so the split leaf of the mode
/// tree has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterMode {
    /// Zero vector.
    Zero = 0,
    /// The nearest neighbouring vector.
    Nearest = 1,
    /// The second distinct neighbouring vector.
    Near = 2,
    /// Explicit delta from the best neighbouring vector.
    New = 3,
}

/// Tree value of the per-subblock luma mode in the y-mode trees.
pub(crate) const B_PRED: i8 = 4;

impl BlockMode {
    /// All whole-block modes in search order.
    pub const ALL: [BlockMode; 4] = [BlockMode::DC, BlockMode::V, BlockMode::H, BlockMode::TM];

    pub(crate) fn into_i8(self) -> i8 {
        self as i8
    }

    pub(crate) fn from_i8(value: i8) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// The subblock mode implied for context purposes when a macroblock is
    /// predicted as a whole.
    pub(crate) fn implied_subblock_mode(self) -> IntraMode {
        match self {
            BlockMode::DC => IntraMode::DC,
            BlockMode::V => IntraMode::VE,
            BlockMode::H => IntraMode::HE,
            BlockMode::TM => IntraMode::TM,
        }
    }
}

impl IntraMode {
    /// All subblock modes in search order.
    pub const ALL: [IntraMode; 10] = [
        IntraMode::DC,
        IntraMode::TM,
        IntraMode::VE,
        IntraMode::HE,
        IntraMode::LD,
        IntraMode::RD,
        IntraMode::VR,
        IntraMode::VL,
        IntraMode::HD,
        IntraMode::HU,
    ];

    pub(crate) fn into_i8(self) -> i8 {
        self as i8
    }

    pub(crate) fn from_i8(value: i8) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }
}

impl InterMode {
    pub(crate) fn into_i8(self) -> i8 {
        self as i8
    }

    pub(crate) fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(InterMode::Zero),
            1 => Some(InterMode::Nearest),
            2 => Some(InterMode::Near),
            3 => Some(InterMode::New),
            _ => None,
        }
    }
}
