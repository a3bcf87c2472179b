// src/rdata/frame.rs

use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Date32Array, DictionaryArray, Float64Array, Int32Array,
        StringArray,
    },
    datatypes::{Field, Int32Type, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::sync::Arc;

use super::sexp::{is_na_real, RObject, RValue, NA_INTEGER};

/// Convert a decoded `data.frame` into a single Arrow record batch.
///
/// Column types map as integer → Int32, double → Float64, logical → Boolean,
/// character → Utf8, factor → Dictionary(Int32, Utf8), Date → Date32.
pub fn data_frame_to_batch(obj: &RObject) -> Result<RecordBatch> {
    if !obj.inherits("data.frame") {
        bail!(
            "object is a {} with class {:?}, not a data.frame",
            obj.type_name(),
            obj.classes()
        );
    }
    let columns = match &obj.value {
        RValue::List(cols) => cols,
        _ => bail!("data.frame payload is {}, expected list", obj.type_name()),
    };
    let names = match obj.attr("names").map(|n| &n.value) {
        Some(RValue::Character(v)) => v.clone(),
        _ if columns.is_empty() => Vec::new(),
        _ => bail!("data.frame has no column names"),
    };
    if names.len() != columns.len() {
        bail!(
            "data.frame has {} names for {} columns",
            names.len(),
            columns.len()
        );
    }

    let nrow = match columns.first() {
        Some(first) => first.len(),
        None => row_count(obj)?,
    };

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for (idx, (name, col)) in names.iter().zip(columns).enumerate() {
        let name = name.clone().unwrap_or_else(|| format!("V{}", idx + 1));
        if col.len() != nrow {
            bail!(
                "column `{}` has {} values, expected {}",
                name,
                col.len(),
                nrow
            );
        }
        let array = column_to_array(col).with_context(|| format!("column `{}`", name))?;
        fields.push(Field::new(&name, array.data_type().clone(), true));
        arrays.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(nrow));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)
        .context("assembling record batch")
}

/// Row count of a frame without columns, taken from `row.names`.
fn row_count(obj: &RObject) -> Result<usize> {
    match obj.attr("row.names").map(|r| &r.value) {
        // compact form c(NA, -n) (or c(NA, n))
        Some(RValue::Integer(v)) if v.len() == 2 && v[0] == NA_INTEGER => {
            Ok(v[1].unsigned_abs() as usize)
        }
        Some(RValue::Real(v)) if v.len() == 2 && is_na_real(v[0]) => Ok(v[1].abs() as usize),
        Some(_) => Ok(obj.attr("row.names").map(RObject::len).unwrap_or(0)),
        None => Ok(0),
    }
}

fn column_to_array(col: &RObject) -> Result<ArrayRef> {
    if col.inherits("factor") {
        return factor_to_array(col);
    }
    let is_date = col.inherits("Date");
    Ok(match &col.value {
        RValue::Integer(v) if is_date => Arc::new(Date32Array::from(
            v.iter().map(|&x| (x != NA_INTEGER).then_some(x)).collect::<Vec<_>>(),
        )),
        RValue::Real(v) if is_date => Arc::new(Date32Array::from(
            v.iter()
                .map(|&x| x.is_finite().then(|| x.floor() as i32))
                .collect::<Vec<_>>(),
        )),
        RValue::Integer(v) => Arc::new(Int32Array::from(
            v.iter().map(|&x| (x != NA_INTEGER).then_some(x)).collect::<Vec<_>>(),
        )),
        RValue::Real(v) => Arc::new(
            v.iter()
                .map(|&x| (!is_na_real(x)).then_some(x))
                .collect::<Float64Array>(),
        ),
        RValue::Logical(v) => Arc::new(
            v.iter()
                .map(|&x| (x != NA_INTEGER).then_some(x != 0))
                .collect::<BooleanArray>(),
        ),
        RValue::Character(v) => Arc::new(v.iter().map(|s| s.as_deref()).collect::<StringArray>()),
        _ => bail!("{} columns are not supported", col.type_name()),
    })
}

fn factor_to_array(col: &RObject) -> Result<ArrayRef> {
    let codes = match &col.value {
        RValue::Integer(v) => v,
        _ => bail!("factor codes are {}, expected integer", col.type_name()),
    };
    let levels = match col.attr("levels").map(|l| &l.value) {
        Some(RValue::Character(v)) => v,
        _ => bail!("factor has no character levels"),
    };
    let nlevels = levels.len() as i32;
    let keys = codes
        .iter()
        .map(|&c| match c {
            NA_INTEGER => Ok(None),
            c if (1..=nlevels).contains(&c) => Ok(Some(c - 1)),
            c => Err(anyhow!("factor code {} outside 1..={}", c, nlevels)),
        })
        .collect::<Result<Int32Array>>()?;
    let values = levels.iter().map(|s| s.as_deref()).collect::<StringArray>();
    let dict = DictionaryArray::<Int32Type>::try_new(keys, Arc::new(values))?;
    Ok(Arc::new(dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::encode::{Encoder, Item};
    use crate::rdata::sexp::Unserializer;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{DataType, Float64Type};

    fn decode(item: Item<'_>) -> RObject {
        let mut e = Encoder::rds(3);
        e.item(&item);
        let bytes = e.finish();
        let mut u = Unserializer::new(&bytes);
        u.header().unwrap();
        u.read_item().unwrap()
    }

    #[test]
    fn converts_mixed_columns() {
        let na_real = f64::from_bits(0x7FF0_0000_0000_07A2);
        let obj = decode(Item::data_frame(
            vec![
                ("id", Item::Int(vec![1, 2, NA_INTEGER])),
                ("amount", Item::Real(vec![1.5, na_real, f64::NAN])),
                ("flag", Item::Lgl(vec![1, 0, NA_INTEGER])),
                ("name", Item::Str(vec![Some("x"), None, Some("z")])),
                ("area", Item::factor(vec![2, NA_INTEGER, 1], vec!["A", "B"])),
            ],
            3,
        ));
        let batch = data_frame_to_batch(&obj).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 5);

        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int32);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Boolean);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field(4).data_type(),
            &DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
        );

        assert!(batch.column(0).is_null(2));
        let amount = batch.column(1).as_primitive::<Float64Type>();
        assert_eq!(amount.value(0), 1.5);
        assert!(amount.is_null(1), "NA_real_ becomes null");
        assert!(amount.is_valid(2) && amount.value(2).is_nan(), "NaN stays NaN");

        let area = batch.column(4).as_dictionary::<Int32Type>();
        assert_eq!(area.keys().value(0), 1);
        assert!(area.keys().is_null(1));
        let levels = area.values().as_string::<i32>();
        assert_eq!(levels.value(1), "B");
    }

    #[test]
    fn zero_column_frame_uses_row_names() {
        let obj = decode(Item::data_frame(vec![], 7));
        let batch = data_frame_to_batch(&obj).unwrap();
        assert_eq!(batch.num_rows(), 7);
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn empty_frame_keeps_schema() {
        let obj = decode(Item::data_frame(
            vec![("id", Item::Int(vec![])), ("v", Item::Real(vec![]))],
            0,
        ));
        let batch = data_frame_to_batch(&obj).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema().field(1).name(), "v");
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let obj = decode(Item::data_frame(
            vec![("a", Item::Int(vec![1, 2])), ("b", Item::Int(vec![1]))],
            2,
        ));
        let err = data_frame_to_batch(&obj).unwrap_err();
        assert!(err.to_string().contains("column `b`"));
    }

    #[test]
    fn non_frame_is_rejected() {
        let obj = decode(Item::Int(vec![1, 2, 3]));
        assert!(data_frame_to_batch(&obj).is_err());
    }

    #[test]
    fn bad_factor_code_is_rejected() {
        let obj = decode(Item::data_frame(
            vec![("f", Item::factor(vec![1, 3], vec!["A", "B"]))],
            2,
        ));
        let err = data_frame_to_batch(&obj).unwrap_err();
        assert!(format!("{err:#}").contains("outside"));
    }
}
