// station_ingest - Batch ingest of the latest weather station observations into InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Reduce text to a plain form by stripping accents and non-printable characters.
///
/// Text is decomposed (NFKD) so that accented letters become a base letter followed
/// by combining marks, and the combining marks and control characters are dropped.
/// For example "España" becomes "Espana".
pub fn plain_text(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c) && !c.is_control())
        .collect()
}

/// Convert a free-form label into a measurement (category) name.
///
/// The result is lowercase and contains no spaces (replaced with underscores), commas
/// or parentheses. This is a pure function and applying it to its own output returns
/// the same value.
pub fn category_name(text: &str) -> String {
    plain_text(text)
        .replace(' ', "_")
        .replace(',', "")
        .to_lowercase()
        .replace(|c: char| c == '(' || c == ')', "")
}
