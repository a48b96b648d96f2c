//! Longest increasing subsequence, used to minimise moves in keyed diffs.

/// Longest increasing subsequence over the non-zero entries of `arr`.
///
/// Returns the *indexes* into `arr` of one longest strictly increasing run
/// of values, in ascending order. Zero entries are skipped: in the keyed
/// diff they mark new nodes with no previous position.
///
/// O(n log n): `result` holds, for each length, the index of the smallest
/// tail seen so far; `predecessors` lets the final chain be rebuilt.
pub fn longest_increasing_subsequence(arr: &[usize]) -> Vec<usize> {
    let mut predecessors = vec![0usize; arr.len()];
    let mut result: Vec<usize> = Vec::with_capacity(arr.len());

    for (i, &value) in arr.iter().enumerate() {
        if value == 0 {
            continue;
        }
        if let Some(&last) = result.last() {
            if arr[last] < value {
                predecessors[i] = last;
                result.push(i);
                continue;
            }
        } else {
            result.push(i);
            continue;
        }

        // First tail whose value is >= `value`.
        let pos = result.partition_point(|&j| arr[j] < value);
        if value < arr[result[pos]] {
            if pos > 0 {
                predecessors[i] = result[pos - 1];
            }
            result[pos] = i;
        }
    }

    // Walk back from the last tail to restore the actual chain.
    let mut len = result.len();
    if len > 0 {
        let mut cursor = result[len - 1];
        while len > 0 {
            len -= 1;
            result[len] = cursor;
            cursor = predecessors[cursor];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lis_len_quadratic(arr: &[usize]) -> usize {
        let idx: Vec<usize> = (0..arr.len()).filter(|&i| arr[i] != 0).collect();
        let mut best = vec![1usize; idx.len()];
        for a in 0..idx.len() {
            for b in 0..a {
                if arr[idx[b]] < arr[idx[a]] {
                    best[a] = best[a].max(best[b] + 1);
                }
            }
        }
        best.into_iter().max().unwrap_or(0)
    }

    #[test]
    fn rotation_keeps_the_long_run() {
        // [d, a, b, c] from [a, b, c, d]: old positions (1-based) are [4, 1, 2, 3]
        assert_eq!(longest_increasing_subsequence(&[4, 1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn zeros_are_skipped() {
        assert_eq!(longest_increasing_subsequence(&[0, 2, 0, 3]), vec![1, 3]);
        assert!(longest_increasing_subsequence(&[0, 0]).is_empty());
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn classic_sequence() {
        let arr = [2, 3, 1, 5, 6, 8, 7, 9, 4];
        let seq = longest_increasing_subsequence(&arr);
        assert_eq!(seq.len(), 6);
        let values: Vec<usize> = seq.iter().map(|&i| arr[i]).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{values:?}");
    }

    proptest! {
        #[test]
        fn result_is_a_longest_increasing_chain(arr in proptest::collection::vec(0usize..40, 0..60)) {
            let seq = longest_increasing_subsequence(&arr);

            prop_assert!(seq.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(seq.windows(2).all(|w| arr[w[0]] < arr[w[1]]));
            prop_assert!(seq.iter().all(|&i| arr[i] != 0));
            prop_assert_eq!(seq.len(), lis_len_quadratic(&arr));
        }
    }
}
