use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Float64Builder, Int64Array, LargeListArray,
    LargeListBuilder, ListArray, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use log::{info, warn};
use ndarray::{Array2, Array3};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::data::endmember::{EndMember, EndMemberGroup};
use crate::data::spectrum::Spectrum;
use crate::error::Error;
use crate::model::ModelResult;
use crate::unmix::UnMixedCube;

// ---------------------------------------------------------------------------
// Save formats
// ---------------------------------------------------------------------------

/// Container formats a [`ModelResult`] can be written to, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// `.parquet` / `.pq` – one row per model group.
    Parquet,
    /// `.sma` – declared, not implemented.
    Sma,
    /// `.csv` – declared, not implemented.
    Csv,
}

impl SaveFormat {
    pub fn from_path(path: &Path) -> std::result::Result<Self, Error> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "parquet" | "pq" => Ok(SaveFormat::Parquet),
            "sma" => Ok(SaveFormat::Sma),
            "csv" => Ok(SaveFormat::Csv),
            other => Err(Error::UnsupportedExtension(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Write `result` into its destination container, keyed by model ID.
///
/// Other model groups already in the file are kept; a group with the same
/// ID is replaced.
pub fn save_model_result(result: &ModelResult) -> Result<()> {
    let path = result.destination.as_path();
    match SaveFormat::from_path(path)? {
        SaveFormat::Parquet => save_parquet(path, result),
        SaveFormat::Sma => bail!(Error::NotImplemented("sma")),
        SaveFormat::Csv => bail!(Error::NotImplemented("csv")),
    }
}

/// Read the model group `model_id` back from a container file.
pub fn load_model_result(path: &Path, model_id: &str) -> Result<ModelResult> {
    if SaveFormat::from_path(path)? != SaveFormat::Parquet {
        bail!("{} is not a parquet model container", path.display());
    }
    let stored = read_groups(path)?
        .into_iter()
        .find(|g| g.model_id == model_id)
        .with_context(|| format!("model '{model_id}' not found in {}", path.display()))?;
    stored.into_result(path)
}

/// IDs of every model group in a container file, in file order.
pub fn list_models(path: &Path) -> Result<Vec<String>> {
    Ok(read_groups(path)?.into_iter().map(|g| g.model_id).collect())
}

// ---------------------------------------------------------------------------
// Stored group – flat, row-major view of one ModelResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredGroup {
    model_id: String,
    height: usize,
    width: usize,
    bands: usize,
    n_fractions: usize,
    constrained: bool,
    wavelengths: Vec<f64>,
    endmember_names: Vec<String>,
    /// Endmember-major: spectrum `i` occupies `[i * bands, (i + 1) * bands)`.
    endmember_spectra: Vec<f64>,
    fractions: Vec<f64>,
    residuals: Vec<f64>,
    model: Vec<f64>,
    residual_norm: Vec<f64>,
}

impl StoredGroup {
    fn from_result(result: &ModelResult) -> Self {
        let unmixed = &result.unmixed;
        let endmember_spectra = result
            .endmembers
            .endmembers()
            .iter()
            .flat_map(|em| em.spectrum().data().iter().copied())
            .collect();

        StoredGroup {
            model_id: result.model_id.clone(),
            height: unmixed.height(),
            width: unmixed.width(),
            bands: unmixed.bands(),
            n_fractions: unmixed.fracs().shape()[2],
            constrained: unmixed.is_constrained(),
            wavelengths: result.endmembers.wavelengths().to_vec(),
            endmember_names: result.endmembers.names().to_vec(),
            endmember_spectra,
            fractions: unmixed.fracs().iter().copied().collect(),
            residuals: unmixed.res().iter().copied().collect(),
            model: unmixed.model().iter().copied().collect(),
            residual_norm: result.residual_norm.iter().copied().collect(),
        }
    }

    fn into_result(self, path: &Path) -> Result<ModelResult> {
        let id = &self.model_id;
        let (h, w, n) = (self.height, self.width, self.bands);

        let expected_fractions = self.endmember_names.len() + usize::from(self.constrained);
        if self.n_fractions != expected_fractions {
            bail!(
                "model '{id}': {} fraction planes for {} endmembers (constrained: {})",
                self.n_fractions,
                self.endmember_names.len(),
                self.constrained
            );
        }

        if self.endmember_spectra.len() != self.endmember_names.len() * n {
            bail!(
                "model '{id}': {} endmember values for {} endmembers of {n} bands",
                self.endmember_spectra.len(),
                self.endmember_names.len()
            );
        }
        let endmembers = self
            .endmember_names
            .iter()
            .zip(self.endmember_spectra.chunks(n.max(1)))
            .map(|(name, data)| -> std::result::Result<EndMember, Error> {
                let spectrum = Spectrum::new(data.to_vec(), self.wavelengths.clone())?;
                Ok(EndMember::new(name.clone(), spectrum))
            })
            .collect::<std::result::Result<Vec<_>, Error>>()
            .with_context(|| format!("model '{id}': rebuilding endmembers"))?;
        let endmembers = EndMemberGroup::from_endmembers(endmembers)
            .with_context(|| format!("model '{id}': rebuilding endmember group"))?;

        let cube = |name: &str, depth: usize, values: Vec<f64>| {
            Array3::from_shape_vec((h, w, depth), values)
                .with_context(|| format!("model '{id}': '{name}' does not fit {h}x{w}x{depth}"))
        };
        let unmixed = UnMixedCube::from_parts(
            cube("model", n, self.model)?,
            cube("fractions", self.n_fractions, self.fractions)?,
            cube("residuals", n, self.residuals)?,
            self.constrained,
        )?;
        let residual_norm = Array2::from_shape_vec((h, w), self.residual_norm)
            .with_context(|| format!("model '{id}': 'residual_norm' does not fit {h}x{w}"))?;

        Ok(ModelResult {
            destination: path.to_path_buf(),
            model_id: self.model_id,
            unmixed,
            endmembers,
            residual_norm,
        })
    }
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

/// List columns use 64-bit offsets; one column holds every group of a file.
fn list_field(name: &str, item: DataType) -> Field {
    Field::new(
        name,
        DataType::LargeList(Arc::new(Field::new("item", item, true))),
        false,
    )
}

fn group_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("model_id", DataType::Utf8, false),
        Field::new("height", DataType::Int64, false),
        Field::new("width", DataType::Int64, false),
        Field::new("bands", DataType::Int64, false),
        Field::new("n_fractions", DataType::Int64, false),
        Field::new("constrained", DataType::Boolean, false),
        list_field("wavelengths", DataType::Float64),
        list_field("endmember_names", DataType::Utf8),
        list_field("endmember_spectra", DataType::Float64),
        list_field("fractions", DataType::Float64),
        list_field("residuals", DataType::Float64),
        list_field("model", DataType::Float64),
        list_field("residual_norm", DataType::Float64),
    ]))
}

fn f64_list_array<'a>(rows: impl Iterator<Item = &'a [f64]>) -> ArrayRef {
    let mut builder = LargeListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn int_array(groups: &[StoredGroup], field: impl Fn(&StoredGroup) -> usize) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(
        groups.iter().map(|g| field(g) as i64),
    ))
}

fn save_parquet(path: &Path, result: &ModelResult) -> Result<()> {
    let mut groups = if path.is_file() {
        read_groups(path)?
    } else {
        Vec::new()
    };
    let before = groups.len();
    groups.retain(|g| g.model_id != result.model_id);
    if groups.len() != before {
        warn!(
            "replacing existing model '{}' in {}",
            result.model_id,
            path.display()
        );
    }
    groups.push(StoredGroup::from_result(result));

    let mut names = LargeListBuilder::new(StringBuilder::new());
    for g in &groups {
        for name in &g.endmember_names {
            names.values().append_value(name);
        }
        names.append(true);
    }

    let schema = group_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from_iter_values(
                groups.iter().map(|g| g.model_id.as_str()),
            )),
            int_array(&groups, |g| g.height),
            int_array(&groups, |g| g.width),
            int_array(&groups, |g| g.bands),
            int_array(&groups, |g| g.n_fractions),
            Arc::new(BooleanArray::from(
                groups.iter().map(|g| g.constrained).collect::<Vec<_>>(),
            )),
            f64_list_array(groups.iter().map(|g| g.wavelengths.as_slice())),
            Arc::new(names.finish()),
            f64_list_array(groups.iter().map(|g| g.endmember_spectra.as_slice())),
            f64_list_array(groups.iter().map(|g| g.fractions.as_slice())),
            f64_list_array(groups.iter().map(|g| g.residuals.as_slice())),
            f64_list_array(groups.iter().map(|g| g.model.as_slice())),
            f64_list_array(groups.iter().map(|g| g.residual_norm.as_slice())),
        ],
    )
    .context("building model record batch")?;

    // The container is only replaced once the new one is complete.
    let partial = partial_path(path);
    if let Err(err) = write_batch(&partial, schema, &batch) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::rename(&partial, path)
        .with_context(|| format!("moving {} into place", partial.display()))?;

    info!(
        "saved model '{}' to {} ({} group(s) in file)",
        result.model_id,
        path.display(),
        groups.len()
    );
    Ok(())
}

/// Sibling file a container is written to before it replaces the original.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_batch(path: &Path, schema: SchemaRef, batch: &RecordBatch) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(batch).context("writing model record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

fn read_groups(path: &Path) -> Result<Vec<StoredGroup>> {
    let file = fs::File::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut groups = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .with_context(|| format!("model container missing '{name}' column"))
        };

        let ids = downcast::<StringArray>(column("model_id")?, "model_id")?;
        let heights = downcast::<Int64Array>(column("height")?, "height")?;
        let widths = downcast::<Int64Array>(column("width")?, "width")?;
        let bands = downcast::<Int64Array>(column("bands")?, "bands")?;
        let n_fractions = downcast::<Int64Array>(column("n_fractions")?, "n_fractions")?;
        let constrained = downcast::<BooleanArray>(column("constrained")?, "constrained")?;
        let wavelengths = column("wavelengths")?;
        let names = column("endmember_names")?;
        let spectra = column("endmember_spectra")?;
        let fractions = column("fractions")?;
        let residuals = column("residuals")?;
        let model = column("model")?;
        let residual_norm = column("residual_norm")?;

        for row in 0..batch.num_rows() {
            let ctx = || format!("model container row {row}");
            groups.push(StoredGroup {
                model_id: ids.value(row).to_string(),
                height: to_usize(heights.value(row)).with_context(ctx)?,
                width: to_usize(widths.value(row)).with_context(ctx)?,
                bands: to_usize(bands.value(row)).with_context(ctx)?,
                n_fractions: to_usize(n_fractions.value(row)).with_context(ctx)?,
                constrained: constrained.value(row),
                wavelengths: extract_f64_list(wavelengths, row).with_context(ctx)?,
                endmember_names: extract_string_list(names, row).with_context(ctx)?,
                endmember_spectra: extract_f64_list(spectra, row).with_context(ctx)?,
                fractions: extract_f64_list(fractions, row).with_context(ctx)?,
                residuals: extract_f64_list(residuals, row).with_context(ctx)?,
                model: extract_f64_list(model, row).with_context(ctx)?,
                residual_norm: extract_f64_list(residual_norm, row).with_context(ctx)?,
            });
        }
    }
    Ok(groups)
}

// -- Parquet / Arrow helpers --

fn downcast<'a, T: 'static>(col: &'a ArrayRef, name: &str) -> Result<&'a T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("column '{name}' has unexpected type {:?}", col.data_type()))
}

fn to_usize(v: i64) -> Result<usize> {
    usize::try_from(v).with_context(|| format!("negative dimension {v}"))
}

/// Values of a List or LargeList column at the given row.
fn list_value(col: &ArrayRef, row: usize) -> Result<ArrayRef> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    match col.data_type() {
        DataType::List(_) => Ok(col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row)),
        DataType::LargeList(_) => Ok(col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row)),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

/// Float64 values of a list column at the given row; nulls read as NaN.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    let values = list_value(col, row)?;
    let floats = downcast::<Float64Array>(&values, "list values")?;
    Ok(floats.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn extract_string_list(col: &ArrayRef, row: usize) -> Result<Vec<String>> {
    let values_array = list_value(col, row)?;
    let strings = values_array
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| {
            format!(
                "List inner type is {:?}, expected Utf8",
                values_array.data_type()
            )
        })?;
    Ok(strings
        .iter()
        .map(|s| s.unwrap_or_default().to_string())
        .collect())
}
