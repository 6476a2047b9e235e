//! Shared helpers for kernel tests and benchmarks.

use cubecl::{prelude::*, server::Handle};
use num_traits::FromPrimitive;

use crate::GpuRuntime;

pub type TestClient = ComputeClient<GpuRuntime>;

pub fn client() -> TestClient {
    GpuRuntime::client(&<GpuRuntime as cubecl::Runtime>::Device::default())
}

/// `0, 1, 2, ...` as `T`.
pub fn range_vec<T: FromPrimitive>(len: usize) -> Vec<T> {
    (0..len)
        .map(|i| T::from_usize(i).expect("index not representable"))
        .collect()
}

pub fn upload<T: CubeElement>(client: &TestClient, data: &[T]) -> Handle {
    client.create_from_slice(T::as_bytes(data))
}

pub fn download<T: CubeElement>(client: &TestClient, handle: Handle) -> Vec<T> {
    T::from_bytes(&client.read_one(handle)).to_vec()
}
