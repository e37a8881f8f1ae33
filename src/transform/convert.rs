//! Pixel layout kernels used by the software stages
//!
//! Every kernel writes the normalize-stage layout: 24-bit BGR, tightly
//! packed, bottom row first. That is the layout platform video processors
//! emit for RGB24, so the pipeline's final flip is the same for every source.
//!
//! YUV sources use BT.601 coefficients:
//! - R = Y + 1.402 * (V - 128)
//! - G = Y - 0.344 * (U - 128) - 0.714 * (V - 128)
//! - B = Y + 1.772 * (U - 128)

use super::NativeStatus;

type KernelResult = Result<(), NativeStatus>;

#[inline]
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    [b, g, r]
}

/// Destination row for top-down row `y` in a bottom-up BGR24 buffer.
#[inline]
fn dst_row(dst: &mut [u8], width: usize, height: usize, y: usize) -> &mut [u8] {
    let pitch = width * 3;
    let start = (height - 1 - y) * pitch;
    &mut dst[start..start + pitch]
}

/// Validate a source against one row of `row_bytes` every `stride` bytes.
fn check(src: &[u8], stride: usize, row_bytes: usize, needed: usize, dst: &[u8], width: usize, height: usize) -> KernelResult {
    if stride < row_bytes || src.len() < needed {
        return Err(NativeStatus::INVALID_STREAM_DATA);
    }
    if dst.len() < width * height * 3 {
        return Err(NativeStatus::BUFFER_TOO_SMALL);
    }
    Ok(())
}

/// Bottom-up BGR24 in, possibly padded rows.
pub fn bgr24_bottom_up(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    let pitch = width * 3;
    if height == 0 || width == 0 {
        return Ok(());
    }
    check(src, stride, pitch, stride * (height - 1) + pitch, dst, width, height)?;
    for row in 0..height {
        let src_row = &src[row * stride..row * stride + pitch];
        dst[row * pitch..(row + 1) * pitch].copy_from_slice(src_row);
    }
    Ok(())
}

/// Bottom-up BGRX/BGRA in; the fourth byte is dropped.
pub fn bgrx_bottom_up(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    check(src, stride, width * 4, stride * (height - 1) + width * 4, dst, width, height)?;
    let pitch = width * 3;
    for row in 0..height {
        let src_row = &src[row * stride..row * stride + width * 4];
        let out = &mut dst[row * pitch..(row + 1) * pitch];
        for (px, bgr) in src_row.chunks_exact(4).zip(out.chunks_exact_mut(3)) {
            bgr.copy_from_slice(&px[..3]);
        }
    }
    Ok(())
}

/// Top-down packed RGB (`RGB3`) in.
pub fn rgb24_top_down(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    check(src, stride, width * 3, stride * (height - 1) + width * 3, dst, width, height)?;
    for y in 0..height {
        let src_row = &src[y * stride..y * stride + width * 3];
        let out = dst_row(dst, width, height, y);
        for (rgb, bgr) in src_row.chunks_exact(3).zip(out.chunks_exact_mut(3)) {
            bgr[0] = rgb[2];
            bgr[1] = rgb[1];
            bgr[2] = rgb[0];
        }
    }
    Ok(())
}

/// Top-down packed BGR (`BGR3`) in.
pub fn bgr24_top_down(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    check(src, stride, width * 3, stride * (height - 1) + width * 3, dst, width, height)?;
    for y in 0..height {
        let src_row = &src[y * stride..y * stride + width * 3];
        dst_row(dst, width, height, y).copy_from_slice(src_row);
    }
    Ok(())
}

/// Packed 4:2:2, two pixels per four bytes. `y_first` selects YUYV over UYVY.
fn packed_422(
    src: &[u8],
    width: usize,
    height: usize,
    stride: usize,
    dst: &mut [u8],
    y_first: bool,
) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    let row_bytes = width.div_ceil(2) * 4;
    check(src, stride, row_bytes, stride * (height - 1) + row_bytes, dst, width, height)?;
    let (y0_at, u_at, y1_at, v_at) = if y_first { (0, 1, 2, 3) } else { (1, 0, 3, 2) };
    for y in 0..height {
        let src_row = &src[y * stride..y * stride + row_bytes];
        let out = dst_row(dst, width, height, y);
        for (pair, chunk) in src_row.chunks_exact(4).enumerate() {
            let x = pair * 2;
            let (u, v) = (chunk[u_at], chunk[v_at]);
            out[x * 3..x * 3 + 3].copy_from_slice(&yuv_to_bgr(chunk[y0_at], u, v));
            if x + 1 < width {
                out[x * 3 + 3..x * 3 + 6].copy_from_slice(&yuv_to_bgr(chunk[y1_at], u, v));
            }
        }
    }
    Ok(())
}

pub fn yuyv(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    packed_422(src, width, height, stride, dst, true)
}

pub fn uyvy(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    packed_422(src, width, height, stride, dst, false)
}

/// Planar Y followed by interleaved UV at half resolution.
pub fn nv12(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    let chroma_rows = height.div_ceil(2);
    let chroma_pitch = width.div_ceil(2) * 2;
    let luma_size = stride * height;
    let chroma_stride = stride.max(chroma_pitch);
    check(src, stride, width, luma_size + chroma_stride * (chroma_rows - 1) + chroma_pitch, dst, width, height)?;
    let (luma, chroma) = src.split_at(luma_size);
    for y in 0..height {
        let luma_row = &luma[y * stride..y * stride + width];
        let uv_row = &chroma[(y / 2) * chroma_stride..(y / 2) * chroma_stride + chroma_pitch];
        let out = dst_row(dst, width, height, y);
        for x in 0..width {
            let pair = (x / 2) * 2;
            out[x * 3..x * 3 + 3].copy_from_slice(&yuv_to_bgr(luma_row[x], uv_row[pair], uv_row[pair + 1]));
        }
    }
    Ok(())
}

/// Three planes: Y, then U and V at half resolution.
pub fn i420(src: &[u8], width: usize, height: usize, stride: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let chroma_stride = stride.div_ceil(2).max(chroma_width);
    let luma_size = stride * height;
    let chroma_size = chroma_stride * chroma_height;
    check(src, stride, width, luma_size + chroma_size * 2, dst, width, height)?;
    let luma = &src[..luma_size];
    let u_plane = &src[luma_size..luma_size + chroma_size];
    let v_plane = &src[luma_size + chroma_size..luma_size + chroma_size * 2];
    for y in 0..height {
        let luma_row = &luma[y * stride..y * stride + width];
        let chroma_row = (y / 2) * chroma_stride;
        let out = dst_row(dst, width, height, y);
        for x in 0..width {
            let c = chroma_row + x / 2;
            out[x * 3..x * 3 + 3].copy_from_slice(&yuv_to_bgr(luma_row[x], u_plane[c], v_plane[c]));
        }
    }
    Ok(())
}

/// Copy a bottom-up BGR buffer into top-down RGB, swapping R and B.
///
/// Rows are addressed by index so `src` is only ever read.
pub fn flip_bgr_to_rgb(src: &[u8], src_stride: usize, width: usize, height: usize, dst: &mut [u8]) -> KernelResult {
    if height == 0 || width == 0 {
        return Ok(());
    }
    let pitch = width * 3;
    if src_stride < pitch || src.len() < src_stride * (height - 1) + pitch {
        return Err(NativeStatus::INVALID_STREAM_DATA);
    }
    if dst.len() < pitch * height {
        return Err(NativeStatus::BUFFER_TOO_SMALL);
    }
    for y in 0..height {
        let start = src_stride * (height - y - 1);
        let src_row = &src[start..start + pitch];
        let dst_row = &mut dst[y * pitch..(y + 1) * pitch];
        for (bgr, rgb) in src_row.chunks_exact(3).zip(dst_row.chunks_exact_mut(3)) {
            rgb[0] = bgr[2];
            rgb[1] = bgr[1];
            rgb[2] = bgr[0];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_gray_stays_gray() {
        // Y=128, U=128, V=128 (mid-gray, no chroma)
        let src = [128, 128, 128, 128];
        let mut dst = [0u8; 6];
        yuyv(&src, 2, 1, 4, &mut dst).unwrap();
        assert_eq!(dst, [128; 6]);
    }

    #[test]
    fn yuyv_odd_width_uses_half_macro_pixel() {
        // 3 pixels wide: two macro-pixels, the second covers one pixel
        let src = [255, 128, 0, 128, 128, 128, 200, 128];
        let mut dst = [0u8; 9];
        yuyv(&src, 3, 1, 8, &mut dst).unwrap();
        assert_eq!(&dst[..3], &[255, 255, 255]);
        assert_eq!(&dst[3..6], &[0, 0, 0]);
        assert_eq!(&dst[6..9], &[128, 128, 128]);
    }

    #[test]
    fn uyvy_white_black() {
        let src = [128, 255, 128, 0];
        let mut dst = [0u8; 6];
        uyvy(&src, 2, 1, 4, &mut dst).unwrap();
        assert_eq!(dst, [255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn yuv_rows_land_bottom_up() {
        // 2x2: top row white, bottom row black
        let src = [255, 128, 255, 128, 0, 128, 0, 128];
        let mut dst = [0u8; 12];
        yuyv(&src, 2, 2, 4, &mut dst).unwrap();
        assert_eq!(&dst[..6], &[0; 6]);
        assert_eq!(&dst[6..], &[255; 6]);
    }

    #[test]
    fn nv12_neutral_chroma() {
        // 2x2 luma, one UV pair
        let src = [10, 20, 30, 40, 128, 128];
        let mut dst = [0u8; 12];
        nv12(&src, 2, 2, 2, &mut dst).unwrap();
        // top row (10, 20) is stored last
        assert_eq!(&dst[6..], &[10, 10, 10, 20, 20, 20]);
        assert_eq!(&dst[..6], &[30, 30, 30, 40, 40, 40]);
    }

    #[test]
    fn i420_neutral_chroma() {
        let src = [50, 60, 70, 80, 128, 128];
        let mut dst = [0u8; 12];
        i420(&src, 2, 2, 2, &mut dst).unwrap();
        assert_eq!(&dst[6..], &[50, 50, 50, 60, 60, 60]);
    }

    #[test]
    fn rgb3_is_swapped_and_inverted() {
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 6];
        rgb24_top_down(&src, 1, 2, 3, &mut dst).unwrap();
        assert_eq!(dst, [6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn bgrx_drops_alpha() {
        let src = [1, 2, 3, 255, 4, 5, 6, 255];
        let mut dst = [0u8; 6];
        bgrx_bottom_up(&src, 2, 1, 8, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn padded_bgr_rows_are_compacted() {
        // width 1, stride 4
        let src = [1, 2, 3, 0, 4, 5, 6, 0];
        let mut dst = [0u8; 6];
        bgr24_bottom_up(&src, 1, 2, 4, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn flip_reads_last_row_first() {
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 6];
        flip_bgr_to_rgb(&src, 3, 1, 2, &mut dst).unwrap();
        assert_eq!(dst, [6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn stride_narrower_than_a_row_is_rejected() {
        let mut dst = [0u8; 24];
        assert_eq!(i420(&[128; 64], 4, 2, 1, &mut dst), Err(NativeStatus::INVALID_STREAM_DATA));
        assert_eq!(nv12(&[128; 64], 4, 2, 2, &mut dst), Err(NativeStatus::INVALID_STREAM_DATA));
        assert_eq!(yuyv(&[128; 64], 4, 2, 6, &mut dst), Err(NativeStatus::INVALID_STREAM_DATA));
        assert_eq!(bgr24_bottom_up(&[0; 64], 4, 2, 3, &mut dst), Err(NativeStatus::INVALID_STREAM_DATA));
        assert_eq!(flip_bgr_to_rgb(&[0; 64], 6, 4, 2, &mut dst), Err(NativeStatus::INVALID_STREAM_DATA));
    }

    #[test]
    fn short_input_is_rejected() {
        let mut dst = [0u8; 12];
        assert_eq!(
            yuyv(&[128; 4], 2, 2, 4, &mut dst),
            Err(NativeStatus::INVALID_STREAM_DATA)
        );
    }
}
