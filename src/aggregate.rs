//! Agregación de los embeddings de las vistas en un único vector por objeto.
//!
//! Política: media aritmética por dimensión. Todas las vistas deben tener la
//! misma dimensionalidad y el resultado debe ser finito; nunca se trunca, se
//! rellena ni se emite un vector de ceros.

use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{AggregationError, IngestError, ValidationError};
use crate::models::ViewImage;

/// Media por dimensión de los embeddings de las vistas.
pub fn mean_vector<V: AsRef<[f32]>>(embeddings: &[V]) -> Result<Vec<f32>, AggregationError> {
    let first = embeddings.first().ok_or(AggregationError::NoViews)?;
    let dims = first.as_ref().len();
    if dims == 0 {
        return Err(AggregationError::ZeroDimensional);
    }

    for (index, embedding) in embeddings.iter().enumerate() {
        let found = embedding.as_ref().len();
        if found != dims {
            return Err(AggregationError::ShapeMismatch {
                index,
                expected: dims,
                found,
            });
        }
    }

    // Acumulamos en f64 para no perder precisión con muchas vistas.
    let mut sums = vec![0.0f64; dims];
    for embedding in embeddings {
        for (sum, value) in sums.iter_mut().zip(embedding.as_ref()) {
            *sum += f64::from(*value);
        }
    }

    let count = embeddings.len() as f64;
    let mean: Vec<f32> = sums.into_iter().map(|sum| (sum / count) as f32).collect();

    if let Some(dimension) = mean.iter().position(|v| !v.is_finite()) {
        return Err(AggregationError::NonFinite { dimension });
    }

    Ok(mean)
}

/// Camino directo: calcula el embedding de cada vista con el modelo y las
/// agrega.
pub async fn aggregate_images(
    embedder: &dyn Embedder,
    views: &[ViewImage],
) -> Result<Vec<f32>, IngestError> {
    if views.is_empty() {
        return Err(AggregationError::NoViews.into());
    }

    let embeddings = embedder.encode(views).await?;
    if embeddings.len() != views.len() {
        return Err(IngestError::Embedding(format!(
            "el modelo devolvió {} embeddings para {} vistas",
            embeddings.len(),
            views.len()
        )));
    }
    debug!("{} embeddings calculados localmente", embeddings.len());

    Ok(mean_vector(&embeddings)?)
}

/// Dimensionalidad de la colección principal. Si no está configurada, el
/// primer registro validado la fija para el resto de la ejecución. Nunca se
/// fija a 0.
#[derive(Debug, Clone, Default)]
pub struct DimensionGuard {
    expected: Option<usize>,
}

impl DimensionGuard {
    pub fn new(expected: Option<usize>) -> Self {
        Self {
            expected: expected.filter(|&dims| dims > 0),
        }
    }

    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    pub fn check(&mut self, found: usize) -> Result<(), ValidationError> {
        if found == 0 {
            return Err(ValidationError::Empty);
        }
        match self.expected {
            Some(expected) if expected != found => {
                Err(ValidationError::DimensionMismatch { expected, found })
            }
            Some(_) => Ok(()),
            None => {
                debug!("Dimensionalidad de la colección fijada a {found}");
                self.expected = Some(found);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_view_is_identity() {
        let v = vec![0.1f32, -2.5, 3.75, 1e-7];
        assert_eq!(mean_vector(&[v.clone()]).unwrap(), v);
    }

    #[test]
    fn mean_of_two_views() {
        let mean = mean_vector(&[vec![1.0f32, 1.0], vec![3.0, 3.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 2.0]);
    }

    #[test]
    fn empty_input_fails() {
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(mean_vector(&empty), Err(AggregationError::NoViews));
    }

    #[test]
    fn mismatched_dimensions_fail_instead_of_truncating() {
        let err = mean_vector(&[vec![1.0f32, 2.0, 3.0], vec![1.0, 2.0]]).unwrap_err();
        assert_eq!(
            err,
            AggregationError::ShapeMismatch {
                index: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn nan_input_is_rejected() {
        let err = mean_vector(&[vec![1.0f32, f32::NAN], vec![1.0, 1.0]]).unwrap_err();
        assert_eq!(err, AggregationError::NonFinite { dimension: 1 });
    }

    #[test]
    fn infinite_input_is_rejected() {
        let err = mean_vector(&[vec![f32::INFINITY, 0.0]]).unwrap_err();
        assert_eq!(err, AggregationError::NonFinite { dimension: 0 });
    }

    #[test]
    fn guard_pins_first_dimensionality() {
        let mut guard = DimensionGuard::new(None);
        assert!(guard.check(512).is_ok());
        assert_eq!(guard.expected(), Some(512));
        assert!(guard.check(512).is_ok());
        assert_eq!(
            guard.check(768),
            Err(ValidationError::DimensionMismatch {
                expected: 512,
                found: 768
            })
        );
    }

    #[test]
    fn zero_dimensional_views_are_rejected() {
        let empty: Vec<Vec<f32>> = vec![Vec::new(), Vec::new()];
        assert_eq!(mean_vector(&empty), Err(AggregationError::ZeroDimensional));
    }

    #[test]
    fn guard_never_pins_zero() {
        let mut guard = DimensionGuard::new(None);
        assert_eq!(guard.check(0), Err(ValidationError::Empty));
        assert_eq!(guard.expected(), None);
        assert!(guard.check(512).is_ok());
        assert_eq!(guard.expected(), Some(512));

        let configured = DimensionGuard::new(Some(0));
        assert_eq!(configured.expected(), None);
    }

    /// Modelo que devuelve siempre un único embedding.
    struct ShortEmbedder;

    #[async_trait::async_trait]
    impl Embedder for ShortEmbedder {
        async fn encode(&self, _views: &[ViewImage]) -> Result<Vec<Vec<f32>>, IngestError> {
            Ok(vec![vec![1.0, 1.0]])
        }

        async fn encode_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn model_must_return_one_embedding_per_view() {
        let views = vec![
            ViewImage::new("obj1", std::path::Path::new("/data/obj1/00.png")),
            ViewImage::new("obj1", std::path::Path::new("/data/obj1/01.png")),
        ];
        let err = tokio_test::block_on(aggregate_images(&ShortEmbedder, &views)).unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));

        let err = tokio_test::block_on(aggregate_images(&ShortEmbedder, &[])).unwrap_err();
        assert!(matches!(err, IngestError::Aggregation(AggregationError::NoViews)));
    }
}
