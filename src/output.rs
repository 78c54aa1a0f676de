//! # Table Output Module
//!
//! Writes the augmented DataFrame as CSV, Parquet or an Excel workbook.
//!
//! Parent directories are created as needed. Null cells become empty CSV fields,
//! Parquet nulls and empty Excel cells.

use crate::input::{TableError, TableFormat, TableResult};
use log::{debug, warn};
use polars::prelude::*;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::fs::{self, File};
use std::path::Path;

/// Rows of one Excel worksheet, header included.
const EXCEL_MAX_ROWS: usize = 1_048_576;

/// Writes `df` to `path`, inferring the format from the extension unless `format` is given.
///
/// # Errors
///
/// This function will return an error if:
/// - The format cannot be inferred from the extension
/// - The output path is not writable
/// - The table has more rows than an Excel worksheet holds (Excel output only)
pub fn write_table<P: AsRef<Path>>(df: &DataFrame, path: P, format: Option<TableFormat>) -> TableResult<()> {
    let path = path.as_ref();
    let format = TableFormat::resolve(path, format)?;

    debug!("Writing {} table to {}", format, path.display());
    debug!("DataFrame shape: {:?}", df.shape());
    debug!("DataFrame schema:\n{:?}", df.schema());

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    match format {
        TableFormat::Csv => {
            let mut file = File::create(path)?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut df.clone())?;
        }
        TableFormat::Parquet => {
            let file = File::create(path)?;
            ParquetWriter::new(file).finish(&mut df.clone())?;
        }
        TableFormat::Xlsx => write_excel(df, path)?,
    }

    debug!("Successfully wrote {}", path.display());
    Ok(())
}

fn write_excel(df: &DataFrame, path: &Path) -> TableResult<()> {
    if df.height() + 1 > EXCEL_MAX_ROWS {
        return Err(TableError::TooManyRows {
            rows: df.height(),
            max: EXCEL_MAX_ROWS - 1,
        });
    }
    if path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("xls"))
    {
        warn!("{} is written in the xlsx format despite its .xls extension", path.display());
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let header = Format::new().set_bold();

    for (col, column) in df.get_columns().iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, column.name().as_str(), &header)?;
        write_excel_column(worksheet, col, column)?;
    }

    workbook.save(path)?;
    Ok(())
}

fn write_excel_column(worksheet: &mut Worksheet, col: u16, column: &Column) -> TableResult<()> {
    match column.dtype() {
        DataType::Boolean => {
            for (row, value) in column.bool()?.into_iter().enumerate() {
                if let Some(value) = value {
                    worksheet.write_boolean(row as u32 + 1, col, value)?;
                }
            }
        }
        dtype if is_numeric(dtype) => {
            let numbers = column.cast(&DataType::Float64)?;
            for (row, value) in numbers.f64()?.into_iter().enumerate() {
                if let Some(value) = value.filter(|v| v.is_finite()) {
                    worksheet.write_number(row as u32 + 1, col, value)?;
                }
            }
        }
        _ => {
            let strings = column.cast(&DataType::String)?;
            for (row, value) in strings.str()?.into_iter().enumerate() {
                if let Some(value) = value {
                    worksheet.write_string(row as u32 + 1, col, value)?;
                }
            }
        }
    }
    Ok(())
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}
