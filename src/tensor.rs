//! Tensor storage and the output-allocation context.
//!
//! A [`Tensor`] is a shape, a dtype and shared byte storage. Cloning a tensor
//! does not copy: both handles alias the same storage. Window creation relies
//! on this to expose the caller's live buffer for the local rank.

use crate::error::{GraphError, Result};
use crate::types::DataType;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_size(&self, i: usize) -> usize {
        self.dims.get(i).copied().unwrap_or(1)
    }

    /// Extent of the outermost dimension (1 for scalars).
    pub fn first_dim(&self) -> usize {
        self.dim_size(0)
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Shape with the first dimension removed.
    pub fn slice_shape(&self) -> TensorShape {
        TensorShape::new(self.dims.iter().skip(1).copied().collect::<Vec<_>>())
    }

    /// `(first) × self`, used to build concatenated gather outputs.
    pub fn prepend(&self, first: usize) -> TensorShape {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(first);
        dims.extend_from_slice(&self.dims);
        TensorShape { dims }
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        TensorShape::new(dims.to_vec())
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// Rust scalar types with a matching [`DataType`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dt:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = $dt;
                #[inline]
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(
    f32 => DataType::F32,
    f64 => DataType::F64,
    i8 => DataType::I8,
    i32 => DataType::I32,
    i64 => DataType::I64,
    u8 => DataType::U8,
    u32 => DataType::U32,
    u64 => DataType::U64,
);

type Storage = Arc<RwLock<Vec<u8>>>;

/// A typed, shaped view over shared byte storage.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: TensorShape,
    dtype: DataType,
    storage: Storage,
}

impl Tensor {
    /// Zero-filled tensor.
    pub fn zeros(shape: TensorShape, dtype: DataType) -> Self {
        let len = shape.num_elements() * dtype.size_in_bytes();
        Self {
            shape,
            dtype,
            storage: Arc::new(RwLock::new(vec![0u8; len])),
        }
    }

    /// Wrap raw little-endian bytes. The length must match `shape × dtype`.
    pub fn from_bytes(shape: TensorShape, dtype: DataType, bytes: Vec<u8>) -> Result<Self> {
        let expected = shape.num_elements() * dtype.size_in_bytes();
        if bytes.len() != expected {
            return Err(GraphError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            shape,
            dtype,
            storage: Arc::new(RwLock::new(bytes)),
        })
    }

    pub fn from_slice<T: Element>(shape: TensorShape, values: &[T]) -> Result<Self> {
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
        for v in values {
            v.write_le(&mut bytes);
        }
        Self::from_bytes(shape, T::DTYPE, bytes)
    }

    /// One-dimensional tensor holding `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = TensorShape::new(vec![values.len()]);
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
        for v in values {
            v.write_le(&mut bytes);
        }
        Self {
            shape,
            dtype: T::DTYPE,
            storage: Arc::new(RwLock::new(bytes)),
        }
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn byte_len(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }

    /// Whether `self` and `other` alias the same storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>> {
        self.storage
            .read()
            .map_err(|_| GraphError::LockPoisoned("tensor storage"))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<u8>>> {
        self.storage
            .write()
            .map_err(|_| GraphError::LockPoisoned("tensor storage"))
    }

    /// Copy the contents out for a send.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.read()?.clone())
    }

    /// Overwrite the contents from a received buffer of exactly `byte_len()` bytes.
    pub fn copy_from_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.write()?;
        if guard.len() != bytes.len() {
            return Err(GraphError::BufferSizeMismatch {
                expected: guard.len(),
                actual: bytes.len(),
            });
        }
        guard.copy_from_slice(bytes);
        Ok(())
    }

    /// Decode the contents as `T`. Fails if `T` does not match the dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(GraphError::InvalidArgument(format!(
                "tensor holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        let guard = self.read()?;
        let size = self.dtype.size_in_bytes();
        Ok(guard.chunks_exact(size).map(T::read_le).collect())
    }
}

/// Allocates output tensors on behalf of an operation.
///
/// The host implementation is [`CpuContext`]; device-backed executors supply
/// their own.
pub trait OpContext: Send + Sync {
    fn allocate_output(&self, shape: &TensorShape, dtype: DataType) -> Result<Tensor>;
}

/// Host-memory allocation context.
#[derive(Debug, Clone, Default)]
pub struct CpuContext;

impl CpuContext {
    pub fn new() -> Self {
        Self
    }
}

impl OpContext for CpuContext {
    fn allocate_output(&self, shape: &TensorShape, dtype: DataType) -> Result<Tensor> {
        let len = shape
            .dims()
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| GraphError::Allocation(format!("{dtype} {shape} overflows usize")))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| GraphError::Allocation(format!("{len} bytes for {dtype} {shape}: {e}")))?;
        bytes.resize(len, 0);
        Tensor::from_bytes(shape.clone(), dtype, bytes)
    }
}
