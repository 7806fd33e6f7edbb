// --- Файл: src/serialization/safetensors_io.rs ---

//! Модуль для работы с форматом SafeTensors.
//!
//! SafeTensors - это безопасный и эффективный формат для хранения тензоров,
//! разработанный HuggingFace. Здесь он используется для снимков состояния
//! блоков: каждый параметр хранится под своим квалифицированным именем в
//! своем dtype (f32, f16 или bf16).

use crate::pairlist::PairList;
use crate::tensor::{DType, Shape};
use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Ошибки при работе с SafeTensors
#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Неподдерживаемый тип данных: {0}")]
    UnsupportedDtype(String),

    #[error("Ошибка формы тензора: ожидалось {expected:?}, получено {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Тензор '{0}' не найден")]
    TensorNotFound(String),

    #[error("Тензор '{0}' встречается дважды")]
    DuplicateTensor(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Декодированные тензоры: имя -> (значение, исходный dtype), по имени.
pub type TensorMap = PairList<String, (ArrayD<f32>, DType)>;

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
    }
}

/// Байты тензора в little-endian, в логическом (row-major) порядке.
fn to_bytes(arr: &ArrayD<f32>, dtype: DType) -> Vec<u8> {
    let mut data = Vec::with_capacity(arr.len() * dtype.size_in_bytes());
    match dtype {
        DType::F32 => arr.iter().for_each(|v| data.extend_from_slice(&v.to_le_bytes())),
        DType::F16 => arr
            .iter()
            .for_each(|v| data.extend_from_slice(&f16::from_f32(*v).to_le_bytes())),
        DType::BF16 => arr
            .iter()
            .for_each(|v| data.extend_from_slice(&bf16::from_f32(*v).to_le_bytes())),
    }
    data
}

fn from_view(view: &TensorView<'_>) -> Result<(ArrayD<f32>, DType)> {
    let shape: Shape = view.shape().to_vec();
    let data = view.data();
    let (values, dtype): (Vec<f32>, DType) = match view.dtype() {
        Dtype::F32 => (
            data.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F32,
        ),
        Dtype::F16 => (
            data.chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::F16,
        ),
        Dtype::BF16 => (
            data.chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::BF16,
        ),
        // f64 приводим к f32
        Dtype::F64 => (
            data.chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
                .collect(),
            DType::F32,
        ),
        other => return Err(SafeTensorsError::UnsupportedDtype(format!("{:?}", other))),
    };

    let actual = values.len();
    let arr = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
        SafeTensorsError::ShapeMismatch {
            expected: shape.clone(),
            actual: vec![actual],
        }
    })?;
    Ok((arr, dtype))
}

/// Кодирует тензоры в буфер SafeTensors.
///
/// Значения записываются в указанном dtype. Имена должны быть уникальны.
pub fn encode_tensors<'a, I>(tensors: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a ArrayD<f32>, DType)>,
{
    let mut seen = HashSet::new();
    let mut encoded = Vec::new();
    for (name, arr, dtype) in tensors {
        if !seen.insert(name) {
            return Err(SafeTensorsError::DuplicateTensor(name.to_string()));
        }
        encoded.push((name, arr.shape().to_vec(), dtype, to_bytes(arr, dtype)));
    }

    let mut views = Vec::with_capacity(encoded.len());
    for (name, shape, dtype, data) in &encoded {
        views.push((
            *name,
            TensorView::new(to_safetensors_dtype(*dtype), shape.clone(), data)?,
        ));
    }
    Ok(safetensors::serialize(views, &None)?)
}

/// Декодирует буфер SafeTensors. Тензоры упорядочены по имени.
pub fn decode_tensors(bytes: &[u8]) -> Result<TensorMap> {
    let tensors = SafeTensors::deserialize(bytes)?;
    let mut views = tensors.tensors();
    views.sort_by(|a, b| a.0.cmp(&b.0));

    let mut result = TensorMap::with_capacity(views.len());
    for (name, view) in views {
        let decoded = from_view(&view)?;
        result.add(name, decoded);
    }
    Ok(result)
}

/// Сохраняет тензоры в файл SafeTensors.
///
/// # Пример
///
/// ```rust,ignore
/// use rustyblocks::serialization::save_safetensors;
/// use rustyblocks::tensor::DType;
///
/// let weight = ndarray::ArrayD::zeros(ndarray::IxDyn(&[4, 4]));
/// save_safetensors("weights.safetensors", [("weight", &weight, DType::F32)])?;
/// ```
pub fn save_safetensors<'a, P, I>(path: P, tensors: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, &'a ArrayD<f32>, DType)>,
{
    let bytes = encode_tensors(tensors)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Загружает все тензоры из файла SafeTensors.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<TensorMap> {
    let buffer = fs::read(path)?;
    decode_tensors(&buffer)
}

/// Загружает конкретный тензор по имени из файла SafeTensors.
pub fn load_tensor<P: AsRef<Path>>(path: P, name: &str) -> Result<(ArrayD<f32>, DType)> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let view = tensors
        .tensor(name)
        .map_err(|_| SafeTensorsError::TensorNotFound(name.to_string()))?;
    from_view(&view)
}

/// Имена тензоров буфера SafeTensors, отсортированные.
pub fn tensor_names(bytes: &[u8]) -> Result<Vec<String>> {
    let tensors = SafeTensors::deserialize(bytes)?;
    let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
    names.sort();
    Ok(names)
}

/// Возвращает список имен тензоров в файле SafeTensors.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let buffer = fs::read(path)?;
    tensor_names(&buffer)
}

/// Возвращает информацию о тензорах в файле (имя, форма, тип).
pub fn tensor_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Shape, String)>> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut info: Vec<(String, Shape, String)> = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec(), format!("{:?}", view.dtype())))
        .collect();
    info.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rustyblocks_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_encode_decode_dtypes() {
        let weight = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let bias = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.1, 0.2, 0.3]).unwrap();

        let bytes = encode_tensors([
            ("weight", &weight, DType::F32),
            ("bias", &bias, DType::F16),
        ])
        .unwrap();
        let decoded = decode_tensors(&bytes).unwrap();

        // отсортировано по имени
        let names: Vec<&str> = decoded.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["bias", "weight"]);

        let (w, w_dtype) = decoded.get("weight").unwrap();
        assert_eq!(w, &weight);
        assert_eq!(*w_dtype, DType::F32);

        let (b, b_dtype) = decoded.get("bias").unwrap();
        assert_eq!(*b_dtype, DType::F16);
        for (a, e) in b.iter().zip(bias.iter()) {
            assert!((a - e).abs() < 1e-3);
        }
    }

    #[test]
    fn test_bf16_roundtrip() {
        let x = ArrayD::from_elem(IxDyn(&[2, 2]), 1.5f32);
        let bytes = encode_tensors([("x", &x, DType::BF16)]).unwrap();
        let (decoded, dtype) = decode_tensors(&bytes).unwrap().remove("x").unwrap();
        assert_eq!(dtype, DType::BF16);
        assert_eq!(decoded, x);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let x = ArrayD::zeros(IxDyn(&[1]));
        let result = encode_tensors([("x", &x, DType::F32), ("x", &x, DType::F32)]);
        assert!(matches!(result, Err(SafeTensorsError::DuplicateTensor(_))));
    }

    #[test]
    fn test_save_load_and_list() {
        let path = temp_path("list.safetensors");
        let a = ArrayD::zeros(IxDyn(&[4, 4]));
        let b = ArrayD::ones(IxDyn(&[4]));
        save_safetensors(&path, [("layer1_weight", &a, DType::F32), ("layer1_bias", &b, DType::F32)])
            .unwrap();

        let names = list_tensors(&path).unwrap();
        assert_eq!(names, vec!["layer1_bias", "layer1_weight"]);

        let loaded = load_safetensors(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(load_tensor(&path, "layer1_bias").unwrap().0, b);
        assert!(matches!(
            load_tensor(&path, "missing"),
            Err(SafeTensorsError::TensorNotFound(_))
        ));

        let info = tensor_info(&path).unwrap();
        assert_eq!(info[1], ("layer1_weight".to_string(), vec![4, 4], "F32".to_string()));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_tensors(b"not a safetensors buffer").is_err());
    }
}
