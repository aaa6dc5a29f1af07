use crate::error::Result;
use crate::io::GridDataset;
use ndarray::Array3;

/// Name of the variable holding `variable` shifted by `(di, dj)` grid cells
pub fn neighbor_name(variable: &str, di: i64, dj: i64) -> String {
    format!("lat_{}_lon_{}_{}", di, dj, variable)
}

/// Split a neighbour variable name back into `(di, dj, base variable)`
pub fn parse_neighbor_name(name: &str) -> Option<(i64, i64, &str)> {
    let rest = name.strip_prefix("lat_")?;
    let (di, rest) = rest.split_once("_lon_")?;
    let (dj, base) = rest.split_once('_')?;
    Some((di.parse().ok()?, dj.parse().ok()?, base))
}

/// Add a spatially offset copy of every variable for each offset within `radius`.
///
/// The value of `lat_{di}_lon_{dj}_{v}` at `(t, i, j)` is `v` at
/// `(t, i + di, j + dj)`; offsets that leave the grid give `NaN`. The centre
/// offset is never generated and the input dataset is left untouched.
pub fn expand(dataset: &GridDataset, radius: usize) -> Result<GridDataset> {
    let mut expanded = dataset.clone();
    let r = radius as i64;
    let (nt, nj, ni) = dataset.shape();

    for (name, data) in dataset.variables() {
        for di in -r..=r {
            for dj in -r..=r {
                if di == 0 && dj == 0 {
                    continue;
                }
                let shifted = Array3::from_shape_fn((nt, nj, ni), |(t, i, j)| {
                    let si = i as i64 + di;
                    let sj = j as i64 + dj;
                    if (0..nj as i64).contains(&si) && (0..ni as i64).contains(&sj) {
                        data[[t, si as usize, sj as usize]]
                    } else {
                        f32::NAN
                    }
                });
                expanded.insert_variable(neighbor_name(name, di, dj), shifted)?;
            }
        }
    }

    Ok(expanded)
}
