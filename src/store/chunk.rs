//! Compressed column chunks
//!
//! A chunk holds up to `chunk_rows` values of one column on one node. The
//! builder collects parsed cells and picks the narrowest encoding that stores
//! every decimal value exactly. Each encoding reserves one NA sentinel.

use crate::reduce::{Decimal, Number, Partial, ReduceOp};
use serde::{Deserialize, Serialize};

/// A parsed cell before compression
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    /// Base-10 literal `mantissa × 10^exponent`
    Decimal { mantissa: i64, exponent: i32 },
    /// A literal that does not fit a 64-bit decimal mantissa
    Float(f64),
    /// Missing value
    Na,
}

impl CellValue {
    pub fn integer(value: i64) -> Self {
        CellValue::Decimal {
            mantissa: value,
            exponent: 0,
        }
    }

    pub fn is_na(&self) -> bool {
        matches!(self, CellValue::Na)
    }
}

/// Largest exponent spread rewritten onto a common scale
const MAX_EXPONENT_SPREAD: i32 = 18;

const BYTE_NA: u8 = u8::MAX;
const SHORT_NA: i16 = i16::MIN;
const SCALED_SHORT_NA: u16 = u16::MAX;
const INT_NA: i32 = i32::MIN;
const LONG_NA: i64 = i64::MIN;

/// Storage layout of one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    /// Small non-negative integers, stored as-is
    Byte(Vec<u8>),
    /// `(code + bias) × 10^exponent` with codes below 255
    ScaledByte {
        codes: Vec<u8>,
        bias: i64,
        exponent: i32,
    },
    /// Integers within ±32767
    Short(Vec<i16>),
    /// `(code + bias) × 10^exponent` with codes below 65535
    ScaledShort {
        codes: Vec<u16>,
        bias: i64,
        exponent: i32,
    },
    Int(Vec<i32>),
    Long(Vec<i64>),
    /// Wide fractional data as mantissas at one shared exponent
    ScaledLong { mantissas: Vec<i64>, exponent: i32 },
    /// Anything that cannot be stored exactly; NA is NaN
    Double(Vec<f64>),
}

/// Encoding tag used for inspection and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Byte,
    ScaledByte,
    Short,
    ScaledShort,
    Int,
    Long,
    ScaledLong,
    Double,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Byte => "byte",
            Encoding::ScaledByte => "scaled_byte",
            Encoding::Short => "short",
            Encoding::ScaledShort => "scaled_short",
            Encoding::Int => "int",
            Encoding::Long => "long",
            Encoding::ScaledLong => "scaled_long",
            Encoding::Double => "double",
        }
    }
}

/// One compressed run of column values
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    data: ChunkData,
}

impl Chunk {
    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    pub fn encoding(&self) -> Encoding {
        match &self.data {
            ChunkData::Byte(_) => Encoding::Byte,
            ChunkData::ScaledByte { .. } => Encoding::ScaledByte,
            ChunkData::Short(_) => Encoding::Short,
            ChunkData::ScaledShort { .. } => Encoding::ScaledShort,
            ChunkData::Int(_) => Encoding::Int,
            ChunkData::Long(_) => Encoding::Long,
            ChunkData::ScaledLong { .. } => Encoding::ScaledLong,
            ChunkData::Double(_) => Encoding::Double,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ChunkData::Byte(v) => v.len(),
            ChunkData::ScaledByte { codes, .. } => codes.len(),
            ChunkData::Short(v) => v.len(),
            ChunkData::ScaledShort { codes, .. } => codes.len(),
            ChunkData::Int(v) => v.len(),
            ChunkData::Long(v) => v.len(),
            ChunkData::ScaledLong { mantissas, .. } => mantissas.len(),
            ChunkData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row`, `None` for NA or out of range
    pub fn value(&self, row: usize) -> Option<Number> {
        let exact =
            |mantissa: i128, exponent: i32| Some(Number::Exact(Decimal::new(mantissa, exponent)));
        match &self.data {
            ChunkData::Byte(v) => match *v.get(row)? {
                BYTE_NA => None,
                code => exact(code as i128, 0),
            },
            ChunkData::ScaledByte {
                codes,
                bias,
                exponent,
            } => match *codes.get(row)? {
                BYTE_NA => None,
                code => exact(code as i128 + *bias as i128, *exponent),
            },
            ChunkData::Short(v) => match *v.get(row)? {
                SHORT_NA => None,
                x => exact(x as i128, 0),
            },
            ChunkData::ScaledShort {
                codes,
                bias,
                exponent,
            } => match *codes.get(row)? {
                SCALED_SHORT_NA => None,
                code => exact(code as i128 + *bias as i128, *exponent),
            },
            ChunkData::Int(v) => match *v.get(row)? {
                INT_NA => None,
                x => exact(x as i128, 0),
            },
            ChunkData::Long(v) => match *v.get(row)? {
                LONG_NA => None,
                x => exact(x as i128, 0),
            },
            ChunkData::ScaledLong {
                mantissas,
                exponent,
            } => match *mantissas.get(row)? {
                LONG_NA => None,
                x => exact(x as i128, *exponent),
            },
            ChunkData::Double(v) => {
                let x = *v.get(row)?;
                if x.is_nan() {
                    None
                } else {
                    Some(Number::Float(x))
                }
            }
        }
    }

    pub fn na_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.value(row).is_none()).count()
    }

    /// Integer sum, non-NA count and exponent of an exactly stored chunk
    fn exact_totals(&self) -> Option<(i128, u64, i32)> {
        fn fold<T: Copy + PartialEq>(
            values: &[T],
            na: T,
            widen: impl Fn(T) -> i128,
        ) -> (i128, u64) {
            values
                .iter()
                .filter(|&&v| v != na)
                .fold((0i128, 0u64), |(sum, count), &v| (sum + widen(v), count + 1))
        }

        let totals = match &self.data {
            ChunkData::Byte(v) => {
                let (sum, count) = fold(v.as_slice(), BYTE_NA, |x: u8| x as i128);
                (sum, count, 0)
            }
            ChunkData::ScaledByte {
                codes,
                bias,
                exponent,
            } => {
                let (sum, count) = fold(codes.as_slice(), BYTE_NA, |x: u8| x as i128);
                (sum + count as i128 * *bias as i128, count, *exponent)
            }
            ChunkData::Short(v) => {
                let (sum, count) = fold(v.as_slice(), SHORT_NA, |x: i16| x as i128);
                (sum, count, 0)
            }
            ChunkData::ScaledShort {
                codes,
                bias,
                exponent,
            } => {
                let (sum, count) = fold(codes.as_slice(), SCALED_SHORT_NA, |x: u16| x as i128);
                (sum + count as i128 * *bias as i128, count, *exponent)
            }
            ChunkData::Int(v) => {
                let (sum, count) = fold(v.as_slice(), INT_NA, |x: i32| x as i128);
                (sum, count, 0)
            }
            ChunkData::Long(v) => {
                let (sum, count) = fold(v.as_slice(), LONG_NA, |x: i64| x as i128);
                (sum, count, 0)
            }
            ChunkData::ScaledLong {
                mantissas,
                exponent,
            } => {
                let (sum, count) = fold(mantissas.as_slice(), LONG_NA, |x: i64| x as i128);
                (sum, count, *exponent)
            }
            ChunkData::Double(_) => return None,
        };
        Some(totals)
    }

    /// Reduce this chunk to a partial, skipping NA values
    pub fn partial(&self, op: ReduceOp) -> Partial {
        match (op, self.exact_totals()) {
            (ReduceOp::Sum, Some((sum, _, exponent))) => Partial::Sum {
                value: Number::Exact(Decimal::new(sum, exponent)),
            },
            (ReduceOp::Count, Some((_, count, _))) => Partial::Count { count },
            _ => {
                let mut partial = Partial::identity(op);
                for row in 0..self.len() {
                    if let Some(number) = self.value(row) {
                        partial.observe(number);
                    }
                }
                partial
            }
        }
    }
}

/// Accumulates parsed cells and compresses them into a `Chunk`
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    cells: Vec<CellValue>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(rows: usize) -> Self {
        Self {
            cells: Vec::with_capacity(rows),
        }
    }

    pub fn push(&mut self, cell: CellValue) {
        self.cells.push(cell);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn finish(self) -> Chunk {
        let data = compress(&self.cells).unwrap_or_else(|| as_doubles(&self.cells));
        Chunk { data }
    }
}

/// Zero gets exponent 0; trailing decimal zeros move into the exponent
fn canonical(mantissa: i64, exponent: i32) -> (i64, i32) {
    if mantissa == 0 {
        return (0, 0);
    }
    let (mut m, mut e) = (mantissa, exponent);
    while m % 10 == 0 {
        m /= 10;
        e += 1;
    }
    (m, e)
}

fn as_doubles(cells: &[CellValue]) -> ChunkData {
    ChunkData::Double(
        cells
            .iter()
            .map(|cell| match *cell {
                CellValue::Decimal { mantissa, exponent } => {
                    Decimal::new(mantissa as i128, exponent).to_f64()
                }
                CellValue::Float(f) => f,
                CellValue::Na => f64::NAN,
            })
            .collect(),
    )
}

/// Pick an exact encoding, or `None` when only doubles will do
fn compress(cells: &[CellValue]) -> Option<ChunkData> {
    let mut canon: Vec<Option<(i64, i32)>> = Vec::with_capacity(cells.len());
    for cell in cells {
        match *cell {
            CellValue::Decimal { mantissa, exponent } => {
                canon.push(Some(canonical(mantissa, exponent)))
            }
            CellValue::Na => canon.push(None),
            CellValue::Float(_) => return None,
        }
    }

    let present = canon.iter().flatten();
    let xmin = present.clone().map(|&(_, e)| e).min();
    let xmax = present.map(|&(_, e)| e).max();
    let (xmin, xmax) = match (xmin, xmax) {
        (Some(lo), Some(hi)) => (lo, hi),
        // All NA
        _ => return Some(ChunkData::Byte(vec![BYTE_NA; cells.len()])),
    };
    if xmax - xmin > MAX_EXPONENT_SPREAD {
        return None;
    }

    // Mantissas rewritten at the shared exponent xmin
    let mut scaled: Vec<Option<i64>> = Vec::with_capacity(canon.len());
    for entry in &canon {
        match entry {
            Some((m, e)) => {
                let factor = 10i64.checked_pow((e - xmin) as u32)?;
                scaled.push(Some(m.checked_mul(factor)?));
            }
            None => scaled.push(None),
        }
    }
    let min = scaled.iter().flatten().copied().min()?;
    let max = scaled.iter().flatten().copied().max()?;
    if min == LONG_NA {
        return None;
    }
    let span = max as i128 - min as i128;

    let biased_bytes = || ChunkData::ScaledByte {
        codes: scaled
            .iter()
            .map(|v| v.map_or(BYTE_NA, |x| (x - min) as u8))
            .collect(),
        bias: min,
        exponent: xmin,
    };
    let biased_shorts = || ChunkData::ScaledShort {
        codes: scaled
            .iter()
            .map(|v| v.map_or(SCALED_SHORT_NA, |x| (x - min) as u16))
            .collect(),
        bias: min,
        exponent: xmin,
    };

    if xmin != 0 {
        return Some(if span < BYTE_NA as i128 {
            biased_bytes()
        } else if span < SCALED_SHORT_NA as i128 {
            biased_shorts()
        } else {
            ChunkData::ScaledLong {
                mantissas: scaled.iter().map(|v| v.unwrap_or(LONG_NA)).collect(),
                exponent: xmin,
            }
        });
    }

    let data = if span < BYTE_NA as i128 {
        if min >= 0 && max < BYTE_NA as i64 {
            ChunkData::Byte(
                scaled
                    .iter()
                    .map(|v| v.map_or(BYTE_NA, |x| x as u8))
                    .collect(),
            )
        } else {
            biased_bytes()
        }
    } else if span < SCALED_SHORT_NA as i128 {
        if min >= -(i16::MAX as i64) && max <= i16::MAX as i64 {
            ChunkData::Short(
                scaled
                    .iter()
                    .map(|v| v.map_or(SHORT_NA, |x| x as i16))
                    .collect(),
            )
        } else {
            biased_shorts()
        }
    } else if min > INT_NA as i64 && max <= i32::MAX as i64 {
        ChunkData::Int(scaled.iter().map(|v| v.map_or(INT_NA, |x| x as i32)).collect())
    } else {
        ChunkData::Long(scaled.iter().map(|v| v.unwrap_or(LONG_NA)).collect())
    };
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::{Combine, Scalar};

    fn build(cells: &[CellValue]) -> Chunk {
        let mut builder = ChunkBuilder::new();
        for cell in cells {
            builder.push(*cell);
        }
        builder.finish()
    }

    fn dec(mantissa: i64, exponent: i32) -> CellValue {
        CellValue::Decimal { mantissa, exponent }
    }

    fn ints(values: &[i64]) -> Chunk {
        build(&values.iter().map(|&v| CellValue::integer(v)).collect::<Vec<_>>())
    }

    #[test]
    fn test_integer_encodings() {
        assert_eq!(ints(&[0, 1, 254]).encoding(), Encoding::Byte);
        assert_eq!(ints(&[1000, 1010]).encoding(), Encoding::ScaledByte);
        assert_eq!(ints(&[-5, 3]).encoding(), Encoding::ScaledByte);
        assert_eq!(ints(&[-30001, 30001]).encoding(), Encoding::Short);
        assert_eq!(ints(&[100_001, 130_001]).encoding(), Encoding::ScaledShort);
        assert_eq!(ints(&[-2_000_001, 2_000_001]).encoding(), Encoding::Int);
        assert_eq!(ints(&[0, 1 << 40]).encoding(), Encoding::Long);
    }

    #[test]
    fn test_fractional_encodings() {
        let chunk = build(&[dec(15, -1), dec(2, 0), dec(25, -1)]);
        assert_eq!(chunk.encoding(), Encoding::ScaledByte);
        assert_eq!(chunk.value(0), Some(Number::Exact(Decimal::new(15, -1))));
        assert_eq!(chunk.value(1), Some(Number::Exact(Decimal::new(2, 0))));

        let chunk = build(&[dec(1, -2), dec(500, 0)]);
        assert_eq!(chunk.encoding(), Encoding::ScaledShort);

        let chunk = build(&[dec(1, -3), dec(9_000_000, 0)]);
        assert_eq!(chunk.encoding(), Encoding::ScaledLong);
        assert_eq!(chunk.value(1), Some(Number::Exact(Decimal::from_int(9_000_000))));
    }

    #[test]
    fn test_trailing_zeros_move_into_exponent() {
        // 100, 200, 300 canonicalize to 1e2, 2e2, 3e2
        let chunk = ints(&[100, 200, 300]);
        assert_eq!(chunk.encoding(), Encoding::ScaledByte);
        assert_eq!(chunk.value(2), Some(Number::Exact(Decimal::from_int(300))));
    }

    #[test]
    fn test_doubles_and_na() {
        let chunk = build(&[dec(1, 0), CellValue::Float(1e300), CellValue::Na]);
        assert_eq!(chunk.encoding(), Encoding::Double);
        assert_eq!(chunk.value(2), None);
        assert_eq!(chunk.na_count(), 1);

        let chunk = build(&[CellValue::Na, CellValue::Na]);
        assert_eq!(chunk.encoding(), Encoding::Byte);
        assert_eq!(chunk.na_count(), 2);
        assert_eq!(chunk.partial(ReduceOp::Sum).finalize(), Scalar::zero());
        assert!(chunk.partial(ReduceOp::Max).finalize().is_missing());
    }

    #[test]
    fn test_na_skipped_by_every_operator() {
        let chunk = build(&[CellValue::integer(4), CellValue::Na, CellValue::integer(-7)]);
        assert_eq!(chunk.partial(ReduceOp::Sum).finalize(), Scalar::from_int(-3));
        assert_eq!(chunk.partial(ReduceOp::Count).finalize(), Scalar::from_int(2));
        assert_eq!(chunk.partial(ReduceOp::Min).finalize(), Scalar::from_int(-7));
        assert_eq!(chunk.partial(ReduceOp::Max).finalize(), Scalar::from_int(4));
    }

    #[test]
    fn test_fast_sum_matches_value_by_value_sum() {
        let cells: Vec<CellValue> = (0..500).map(|i| dec(i * 37 - 4000, -2)).collect();
        let chunk = build(&cells);
        let mut slow = Partial::identity(ReduceOp::Sum);
        for row in 0..chunk.len() {
            slow.observe(chunk.value(row).unwrap());
        }
        assert_eq!(chunk.partial(ReduceOp::Sum), slow);
    }

    #[test]
    fn test_compression_never_changes_a_sum() {
        let base = vec![dec(12, -1), dec(-3, 0), CellValue::Na, dec(40, 1)];
        let whole = build(&base).partial(ReduceOp::Sum);
        let halves = build(&base[..2])
            .partial(ReduceOp::Sum)
            .combine(build(&base[2..]).partial(ReduceOp::Sum));
        assert_eq!(whole.clone().finalize(), halves.finalize());
        assert_eq!(whole.finalize(), Scalar::Exact(Decimal::new(3982, -1)));
    }
}
