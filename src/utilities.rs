pub mod multi_index;
pub mod tensor;
